//! WAV file sample source.

use crate::audio::format::{AudioFormat, SampleEncoding};
use crate::audio::source::{Chunk, SampleSource, StopSignal, StreamInfo};
use crate::defaults;
use crate::error::{PitchscopeError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

type BoxedReader = Box<dyn Read + Send>;

/// Streams samples from a WAV container.
///
/// The format (sample rate, bit depth) comes from the file header.
/// Multi-channel audio is downmixed to mono by averaging. Samples are read
/// lazily, `chunk_size` frames at a time, so memory stays bounded.
pub struct WavSampleSource {
    origin: WavOrigin,
    reader: Option<hound::WavReader<BoxedReader>>,
    chunk_size: usize,
    channels: usize,
    encoding: SampleEncoding,
}

enum WavOrigin {
    Path(PathBuf),
    /// An in-memory or piped reader; consumed by the first `open`.
    Reader(Option<BoxedReader>),
}

impl WavSampleSource {
    /// Source reading from a file on disk. The file is opened by [`SampleSource::open`].
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::with_origin(WavOrigin::Path(path.as_ref().to_path_buf()))
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: BoxedReader) -> Self {
        Self::with_origin(WavOrigin::Reader(Some(reader)))
    }

    fn with_origin(origin: WavOrigin) -> Self {
        Self {
            origin,
            reader: None,
            chunk_size: defaults::CHUNK_SIZE,
            channels: 1,
            encoding: SampleEncoding::Pcm16,
        }
    }

    /// Number of mono samples returned per read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn unavailable(&self, message: String) -> PitchscopeError {
        PitchscopeError::SourceUnavailable {
            source_name: self.name(),
            message,
        }
    }

    fn read_failure(&self, message: String) -> PitchscopeError {
        PitchscopeError::SourceReadFailure {
            source_name: self.name(),
            message,
        }
    }

    fn take_reader(&mut self) -> Result<BoxedReader> {
        let opened: std::result::Result<BoxedReader, String> = match &mut self.origin {
            WavOrigin::Path(path) => File::open(&*path)
                .map(|file| Box::new(BufReader::new(file)) as BoxedReader)
                .map_err(|e| format!("Failed to open file: {}", e)),
            WavOrigin::Reader(reader) => reader
                .take()
                .ok_or_else(|| "reader already consumed".to_string()),
        };
        opened.map_err(|message| self.unavailable(message))
    }
}

impl SampleSource for WavSampleSource {
    fn name(&self) -> String {
        match &self.origin {
            WavOrigin::Path(path) => format!("wav:{}", path.display()),
            WavOrigin::Reader(_) => "wav:<reader>".to_string(),
        }
    }

    fn open(&mut self) -> Result<StreamInfo> {
        let reader = self.take_reader()?;
        let wav_reader = hound::WavReader::new(reader)
            .map_err(|e| self.unavailable(format!("Failed to parse WAV file: {}", e)))?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(self.unavailable("WAV header declares zero channels".to_string()));
        }
        let encoding = match spec.sample_format {
            hound::SampleFormat::Float => SampleEncoding::Float32,
            hound::SampleFormat::Int => {
                SampleEncoding::from_bits(spec.bits_per_sample).ok_or_else(|| {
                    self.unavailable(format!(
                        "Unsupported bit depth: {}",
                        spec.bits_per_sample
                    ))
                })?
            }
        };

        self.channels = spec.channels as usize;
        self.encoding = encoding;
        // hound's len() counts interleaved samples across all channels.
        let total = wav_reader.len() as u64 / spec.channels as u64;
        self.reader = Some(wav_reader);

        Ok(StreamInfo::finite(
            AudioFormat {
                sample_rate: spec.sample_rate,
                encoding,
            },
            total,
        ))
    }

    fn read_chunk(&mut self, _stop: &StopSignal) -> Result<Chunk> {
        let channels = self.channels;
        let encoding = self.encoding;
        let wanted = self.chunk_size * channels;

        let Some(reader) = self.reader.as_mut() else {
            return Ok(Chunk::end());
        };

        let interleaved: std::result::Result<Vec<f32>, hound::Error> = match encoding {
            SampleEncoding::Float32 => reader.samples::<f32>().take(wanted).collect(),
            _ => reader
                .samples::<i32>()
                .take(wanted)
                .map(|s| s.map(|v| encoding.normalize(v)))
                .collect(),
        };
        let interleaved = interleaved.map_err(|e| self.read_failure(e.to_string()))?;

        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if mono.len() < self.chunk_size {
            Ok(Chunk::last(mono))
        } else {
            Ok(Chunk::data(mono))
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Write mono normalized samples to a WAV file of the given format.
///
/// Used by tests and by the CLI to produce fixtures.
pub fn write_wav(path: &Path, format: AudioFormat, samples: &[f32]) -> Result<()> {
    let mut writer = WavWriter::create(path, format)?;
    writer.write(samples)?;
    writer.finalize()
}

/// Thin wrapper over `hound::WavWriter` that takes normalized samples.
pub struct WavWriter {
    inner: hound::WavWriter<std::io::BufWriter<File>>,
    encoding: SampleEncoding,
}

impl WavWriter {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self> {
        let (bits_per_sample, sample_format) = match format.encoding {
            SampleEncoding::Float32 => (32, hound::SampleFormat::Float),
            other => (
                (other.bytes_per_sample() * 8) as u16,
                hound::SampleFormat::Int,
            ),
        };
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: format.sample_rate,
            bits_per_sample,
            sample_format,
        };
        let inner = hound::WavWriter::create(path, spec).map_err(|e| {
            PitchscopeError::Other(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self {
            inner,
            encoding: format.encoding,
        })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        let scale = match self.encoding {
            SampleEncoding::Float32 => None,
            SampleEncoding::Pcm8 => Some(128.0),
            SampleEncoding::Pcm16 => Some(32_768.0),
            SampleEncoding::Pcm24 => Some(8_388_608.0),
            SampleEncoding::Pcm32 => Some(2_147_483_648.0),
        };
        for &s in samples {
            let written = match scale {
                None => self.inner.write_sample(s),
                Some(scale) => {
                    let v = ((s as f64) * scale).round().clamp(-scale, scale - 1.0) as i32;
                    self.inner.write_sample(v)
                }
            };
            written.map_err(|e| PitchscopeError::Other(format!("WAV write failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<()> {
        self.inner
            .finalize()
            .map_err(|e| PitchscopeError::Other(format!("WAV finalize failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn source_for(data: Vec<u8>) -> WavSampleSource {
        WavSampleSource::from_reader(Box::new(Cursor::new(data)))
    }

    #[test]
    fn open_reports_header_format_and_length() {
        let wav = make_wav_data(22_050, 1, &[0i16; 300]);
        let mut source = source_for(wav);
        let info = source.open().unwrap();
        assert_eq!(info.format.sample_rate, 22_050);
        assert_eq!(info.format.encoding, SampleEncoding::Pcm16);
        assert_eq!(info.total_samples, Some(300));
    }

    #[test]
    fn mono_samples_are_normalized() {
        let wav = make_wav_data(16_000, 1, &[16_384, -32_768, 0]);
        let mut source = source_for(wav);
        source.open().unwrap();
        let chunk = source.read_chunk(&StopSignal::new()).unwrap();
        assert_eq!(chunk.samples, vec![0.5, -1.0, 0.0]);
        assert!(chunk.end_of_stream);
    }

    #[test]
    fn stereo_is_downmixed_to_mono() {
        // Stereo pairs: (16384, 0), (-16384, -16384)
        let wav = make_wav_data(16_000, 2, &[16_384, 0, -16_384, -16_384]);
        let mut source = source_for(wav);
        let info = source.open().unwrap();
        assert_eq!(info.total_samples, Some(2));
        let chunk = source.read_chunk(&StopSignal::new()).unwrap();
        assert_eq!(chunk.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn reads_in_chunks_until_end() {
        let wav = make_wav_data(16_000, 1, &[1i16; 2500]);
        let mut source = source_for(wav).with_chunk_size(1000);
        let stop = StopSignal::new();
        source.open().unwrap();

        let sizes: Vec<(usize, bool)> = (0..3)
            .map(|_| {
                let c = source.read_chunk(&stop).unwrap();
                (c.samples.len(), c.end_of_stream)
            })
            .collect();
        assert_eq!(sizes, vec![(1000, false), (1000, false), (500, true)]);
    }

    #[test]
    fn exact_multiple_ends_with_empty_chunk() {
        let wav = make_wav_data(16_000, 1, &[1i16; 20]);
        let mut source = source_for(wav).with_chunk_size(10);
        let stop = StopSignal::new();
        source.open().unwrap();
        assert!(!source.read_chunk(&stop).unwrap().end_of_stream);
        assert!(!source.read_chunk(&stop).unwrap().end_of_stream);
        let last = source.read_chunk(&stop).unwrap();
        assert!(last.samples.is_empty());
        assert!(last.end_of_stream);
    }

    #[test]
    fn invalid_wav_data_is_unavailable() {
        let mut source = source_for(b"definitely not a wav file".to_vec());
        assert!(matches!(
            source.open(),
            Err(PitchscopeError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let mut source = WavSampleSource::from_path("/nonexistent/pitchscope/test.wav");
        match source.open() {
            Err(PitchscopeError::SourceUnavailable { source_name, .. }) => {
                assert!(source_name.contains("test.wav"));
            }
            other => panic!("Expected SourceUnavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn reader_cannot_be_opened_twice() {
        let wav = make_wav_data(16_000, 1, &[0i16; 4]);
        let mut source = source_for(wav);
        source.open().unwrap();
        source.close();
        assert!(source.open().is_err());
    }

    #[test]
    fn truncated_data_reports_read_failure() {
        let mut wav = make_wav_data(16_000, 1, &[1000i16; 64]);
        // Drop the last byte so the final sample is incomplete.
        wav.pop();
        let mut source = source_for(wav).with_chunk_size(1024);
        source.open().unwrap();
        let result = source.read_chunk(&StopSignal::new());
        assert!(matches!(
            result,
            Err(PitchscopeError::SourceReadFailure { .. })
        ));
    }

    #[test]
    fn write_then_stream_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = vec![0.25f32, -0.25, 0.5, -0.5];
        write_wav(&path, AudioFormat::pcm16(8000), &samples).unwrap();

        let mut source = WavSampleSource::from_path(&path);
        let info = source.open().unwrap();
        assert_eq!(info.format, AudioFormat::pcm16(8000));
        let chunk = source.read_chunk(&StopSignal::new()).unwrap();
        assert_eq!(chunk.samples, samples);
    }
}
