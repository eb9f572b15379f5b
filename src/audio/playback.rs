//! Speaker output using CPAL.

use crate::audio::capture::with_suppressed_stderr;
use crate::audio::format::AudioFormat;
use crate::error::{PitchscopeError, Result};
use crate::processors::playback::PlaybackSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Seconds of audio queued ahead of the device before `write` blocks.
const QUEUE_SECONDS: f32 = 0.5;
/// How long `write` waits for the device to make room before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// SAFETY: only the thread that owns the `CpalPlayback` touches the stream.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Plays mono audio on an output device, duplicating it to every channel.
///
/// `write` blocks while the queue is full, so playback paces the dispatch
/// loop to real time.
pub struct CpalPlayback {
    device_name: Option<String>,
    format: Option<AudioFormat>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
    stream: Option<SendableStream>,
}

impl CpalPlayback {
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            format: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            capacity: 0,
            stream: None,
        }
    }

    fn find_output_device(&self) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            match self.device_name.as_deref() {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| PitchscopeError::Playback {
                        message: format!("Failed to enumerate output devices: {}", e),
                    })?
                    .find(|dev| dev.name().is_ok_and(|n| n == name))
                    .ok_or_else(|| PitchscopeError::AudioDeviceNotFound {
                        device: name.to_string(),
                    }),
                None => host
                    .default_output_device()
                    .ok_or_else(|| PitchscopeError::AudioDeviceNotFound {
                        device: "default output".to_string(),
                    }),
            }
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl PlaybackSink for CpalPlayback {
    fn name(&self) -> &str {
        "speaker"
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        let device = self.find_output_device()?;
        let channels = device
            .default_output_config()
            .map(|c| c.channels())
            .unwrap_or(2)
            .max(1);
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::clone(&self.queue);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue.try_lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels as usize) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| tracing::error!("playback stream error: {}", err),
                None,
            )
            .map_err(|e| PitchscopeError::Playback {
                message: format!(
                    "Failed to build {}Hz output stream: {}",
                    format.sample_rate, e
                ),
            })?;
        stream.play().map_err(|e| PitchscopeError::Playback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        self.capacity = ((format.sample_rate as f32 * QUEUE_SECONDS) as usize).max(1);
        self.format = Some(format);
        self.stream = Some(SendableStream(stream));
        tracing::debug!(rate = format.sample_rate, channels, "playback opened");
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(format) = self.format else {
            return Err(PitchscopeError::Playback {
                message: "output stream is not open".to_string(),
            });
        };
        let samples = format.decode(bytes);

        let mut last_level = self.queued();
        let mut last_progress = Instant::now();
        while last_level + samples.len() > self.capacity && last_level > 0 {
            thread::sleep(POLL_INTERVAL);
            let level = self.queued();
            if level < last_level {
                last_progress = Instant::now();
            } else if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(PitchscopeError::Playback {
                    message: "output device stopped consuming audio".to_string(),
                });
            }
            last_level = level;
        }

        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.extend(samples);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let deadline = Instant::now() + STALL_TIMEOUT;
        while self.queued() > 0 && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            tracing::debug!("pausing playback stream failed: {}", e);
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        Ok(())
    }
}
