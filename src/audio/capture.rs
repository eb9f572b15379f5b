//! Live capture using CPAL (Cross-Platform Audio Library).

use crate::audio::format::AudioFormat;
use crate::audio::source::{Chunk, SampleSource, StopSignal, StreamInfo};
use crate::defaults;
use crate::error::{PitchscopeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device name patterns that are never capture lines.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "HDMI", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// List the names of available capture devices.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| PitchscopeError::SourceUnavailable {
        source_name: "capture".to_string(),
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .collect())
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| PitchscopeError::SourceUnavailable {
                    source_name: name.to_string(),
                    message: format!("Failed to enumerate devices: {}", e),
                })?
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| PitchscopeError::AudioDeviceNotFound {
                    device: name.to_string(),
                }),
            None => host
                .default_input_device()
                .ok_or_else(|| PitchscopeError::AudioDeviceNotFound {
                    device: "default".to_string(),
                }),
        }
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created, paused and dropped by whichever thread owns
/// the `CpalSampleSource`; it is never touched from two threads at once.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// State that exists only while the capture line is open.
struct OpenLine {
    stream: SendableStream,
    samples_rx: Receiver<Vec<f32>>,
    stream_error: Arc<Mutex<Option<String>>>,
}

/// Live capture source: mono, 16-bit signed at a fixed sample rate.
///
/// The CPAL callback pushes normalized chunks into a bounded channel;
/// `read_chunk` blocks on that channel and on the stop signal. When the
/// dispatcher falls behind, callback chunks are dropped and counted as overruns.
pub struct CpalSampleSource {
    device_name: Option<String>,
    sample_rate: u32,
    queue_chunks: usize,
    line: Option<OpenLine>,
    overruns: Arc<AtomicU64>,
}

impl CpalSampleSource {
    /// Create a capture source for `device_name` (or the default input device).
    ///
    /// The device is looked up when the source is opened.
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            sample_rate: defaults::SAMPLE_RATE,
            queue_chunks: defaults::CAPTURE_QUEUE_CHUNKS,
            line: None,
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Chunks dropped because the dispatcher could not keep up.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    fn unavailable(&self, message: String) -> PitchscopeError {
        PitchscopeError::SourceUnavailable {
            source_name: self.name(),
            message,
        }
    }

    /// Build the input stream.
    ///
    /// Tries i16 first, then f32, both mono at the requested rate.
    fn build_stream(
        &self,
        device: &cpal::Device,
        tx: Sender<Vec<f32>>,
        stream_error: Arc<Mutex<Option<String>>>,
    ) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let make_err_callback = |slot: Arc<Mutex<Option<String>>>| {
            move |err: cpal::StreamError| {
                tracing::warn!("capture stream error: {}", err);
                if let Ok(mut guard) = slot.lock() {
                    guard.get_or_insert_with(|| err.to_string());
                }
            }
        };

        let i16_tx = tx.clone();
        let overruns = Arc::clone(&self.overruns);
        let attempt = device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let chunk = data.iter().map(|&s| s as f32 / 32_768.0).collect();
                push_chunk(&i16_tx, chunk, &overruns);
            },
            make_err_callback(Arc::clone(&stream_error)),
            None,
        );
        if let Ok(stream) = attempt {
            return Ok(stream);
        }

        let overruns = Arc::clone(&self.overruns);
        device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let chunk = data.iter().map(|&s| s.clamp(-1.0, 1.0)).collect();
                    push_chunk(&tx, chunk, &overruns);
                },
                make_err_callback(stream_error),
                None,
            )
            .map_err(|e| {
                self.unavailable(format!(
                    "Failed to build mono {}Hz input stream: {}",
                    self.sample_rate, e
                ))
            })
    }
}

fn push_chunk(tx: &Sender<Vec<f32>>, chunk: Vec<f32>, overruns: &AtomicU64) {
    if let Err(TrySendError::Full(_)) = tx.try_send(chunk) {
        overruns.fetch_add(1, Ordering::Relaxed);
    }
}

impl SampleSource for CpalSampleSource {
    fn name(&self) -> String {
        format!(
            "capture:{}",
            self.device_name.as_deref().unwrap_or("default")
        )
    }

    fn open(&mut self) -> Result<StreamInfo> {
        if self.line.is_some() {
            return Err(self.unavailable("capture line already open".to_string()));
        }

        let device = find_device(self.device_name.as_deref()).map_err(|e| match e {
            PitchscopeError::AudioDeviceNotFound { device } => {
                self.unavailable(format!("Audio device not found: {}", device))
            }
            other => other,
        })?;

        let (tx, rx) = bounded(self.queue_chunks);
        let stream_error = Arc::new(Mutex::new(None));
        let stream = self.build_stream(&device, tx, Arc::clone(&stream_error))?;
        stream
            .play()
            .map_err(|e| self.unavailable(format!("Failed to start audio stream: {}", e)))?;

        tracing::debug!(source = %self.name(), rate = self.sample_rate, "capture line opened");
        self.line = Some(OpenLine {
            stream: SendableStream(stream),
            samples_rx: rx,
            stream_error,
        });
        Ok(StreamInfo::live(AudioFormat::pcm16(self.sample_rate)))
    }

    fn read_chunk(&mut self, stop: &StopSignal) -> Result<Chunk> {
        let Some(line) = self.line.as_ref() else {
            return Ok(Chunk::end());
        };

        if let Ok(guard) = line.stream_error.lock()
            && let Some(message) = guard.as_ref()
        {
            return Err(PitchscopeError::SourceReadFailure {
                source_name: self.name(),
                message: message.clone(),
            });
        }

        select! {
            recv(line.samples_rx) -> msg => match msg {
                Ok(samples) => Ok(Chunk::data(samples)),
                Err(_) => Err(PitchscopeError::SourceReadFailure {
                    source_name: self.name(),
                    message: "capture stream disconnected".to_string(),
                }),
            },
            recv(stop.closed()) -> _ => Ok(Chunk::default()),
        }
    }

    fn close(&mut self) {
        if let Some(line) = self.line.take() {
            if let Err(e) = line.stream.0.pause() {
                tracing::debug!("pausing capture stream failed: {}", e);
            }
            drop(line);
            tracing::debug!(source = %self.name(), overruns = self.overruns(), "capture line closed");
        }
    }
}

impl Drop for CpalSampleSource {
    fn drop(&mut self) {
        self.close();
    }
}
