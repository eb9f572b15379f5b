//! Playback of the non-overlapping part of each frame.

use crate::audio::format::AudioFormat;
use crate::audio::wav::WavWriter;
use crate::dispatch::buffer::Frame;
use crate::dispatch::chain::{Processor, ProcessorAction};
use crate::error::{PitchscopeError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Destination for raw audio bytes in the stream's format.
pub trait PlaybackSink: Send {
    fn name(&self) -> &str;

    /// Prepare for a stream of `format`. Called once, before any write.
    fn open(&mut self, format: AudioFormat) -> Result<()>;

    /// Play or store `bytes`. May block to apply backpressure.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flush and release the output.
    fn finish(&mut self) -> Result<()>;
}

/// Feeds each frame's new bytes to a [`PlaybackSink`].
///
/// Overlapped samples were already written with the previous frame and
/// padding was never part of the stream, so neither is written.
pub struct PlaybackProcessor {
    name: String,
    sink: Box<dyn PlaybackSink>,
}

impl PlaybackProcessor {
    /// Open `sink` for `format` and wrap it.
    pub fn new(mut sink: Box<dyn PlaybackSink>, format: AudioFormat) -> Result<Self> {
        sink.open(format)?;
        Ok(Self {
            name: format!("playback:{}", sink.name()),
            sink,
        })
    }
}

impl Processor for PlaybackProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_full(&mut self, frame: &Frame) -> Result<ProcessorAction> {
        self.sink.write(frame.new_bytes())?;
        Ok(ProcessorAction::Continue)
    }

    fn processing_finished(&mut self) {
        if let Err(e) = self.sink.finish() {
            tracing::warn!(processor = %self.name, "playback finish failed: {}", e);
        }
    }
}

/// Records played audio to a WAV file.
pub struct WavWriterSink {
    path: PathBuf,
    format: Option<AudioFormat>,
    writer: Option<WavWriter>,
}

impl WavWriterSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format: None,
            writer: None,
        }
    }
}

impl PlaybackSink for WavWriterSink {
    fn name(&self) -> &str {
        "wav-writer"
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        self.writer = Some(WavWriter::create(&self.path, format)?);
        self.format = Some(format);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let (Some(writer), Some(format)) = (self.writer.as_mut(), self.format) else {
            return Err(PitchscopeError::Playback {
                message: format!("{} is not open", self.path.display()),
            });
        };
        writer.write(&format.decode(bytes))
    }

    fn finish(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => {
                writer.finalize()?;
                tracing::debug!(path = %self.path.display(), "recording finalized");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Keeps every written byte in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlaybackSink {
    bytes: Arc<Mutex<Vec<u8>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemoryPlaybackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        match self.bytes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.lock().map(|g| *g).unwrap_or(false)
    }
}

impl PlaybackSink for MemoryPlaybackSink {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&mut self, _format: AudioFormat) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut guard = match self.bytes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.extend_from_slice(bytes);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Ok(mut guard) = self.finished.lock() {
            *guard = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{SampleSource, StopSignal};
    use crate::audio::wav::WavSampleSource;
    use crate::dispatch::buffer::{FrameGeometry, OverlapFrameBuffer};

    fn play_through(
        processor: &mut PlaybackProcessor,
        input: &[f32],
        geometry: FrameGeometry,
        format: AudioFormat,
    ) {
        let mut buffer = OverlapFrameBuffer::new(geometry, format);
        let mut rest = input;
        while !rest.is_empty() {
            let (taken, frame) = buffer.push(rest);
            if let Some(frame) = frame {
                processor.process_full(frame).unwrap();
            }
            rest = &rest[taken..];
        }
        if let Some(frame) = buffer.finish() {
            processor.process_full(frame).unwrap();
        }
        processor.processing_finished();
    }

    #[test]
    fn writes_each_sample_exactly_once() {
        let format = AudioFormat::pcm16(8000);
        let sink = MemoryPlaybackSink::new();
        let mut processor = PlaybackProcessor::new(Box::new(sink.clone()), format).unwrap();
        assert_eq!(processor.name(), "playback:memory");

        let input: Vec<f32> = (0..37).map(|i| (i as f32 - 18.0) / 20.0).collect();
        play_through(
            &mut processor,
            &input,
            FrameGeometry::new(16, 12).unwrap(),
            format,
        );

        let mut expected = Vec::new();
        format.encode_into(&input, &mut expected);
        assert_eq!(sink.bytes(), expected);
        assert!(sink.is_finished());
    }

    #[test]
    fn wav_writer_sink_records_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.wav");
        let format = AudioFormat::pcm16(16_000);
        let mut processor =
            PlaybackProcessor::new(Box::new(WavWriterSink::new(&path)), format).unwrap();

        let input: Vec<f32> = (0..1000).map(|i| ((i % 50) as f32 - 25.0) / 50.0).collect();
        play_through(
            &mut processor,
            &input,
            FrameGeometry::new(256, 192).unwrap(),
            format,
        );

        let mut source = WavSampleSource::from_path(&path);
        let info = source.open().unwrap();
        assert_eq!(info.total_samples, Some(1000));
        assert_eq!(info.format.sample_rate, 16_000);
        let chunk = source.read_chunk(&StopSignal::new()).unwrap();
        assert_eq!(chunk.samples.len(), 1000);
        assert!((chunk.samples[10] - input[10]).abs() < 1e-4);
    }

    #[test]
    fn wav_writer_sink_rejects_write_before_open() {
        let mut sink = WavWriterSink::new("/nonexistent/never.wav");
        assert!(matches!(
            sink.write(&[0, 0]),
            Err(PitchscopeError::Playback { .. })
        ));
        assert!(sink.finish().is_ok());
    }
}
