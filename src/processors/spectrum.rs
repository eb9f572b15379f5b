//! Magnitude spectrum of each frame.

use crate::audio::source::StreamInfo;
use crate::dispatch::buffer::Frame;
use crate::dispatch::chain::{Processor, ProcessorAction};
use crate::error::{PitchscopeError, Result};
use crate::processors::pitch::PitchHint;
use crate::sink::{SpectrumEvent, SpectrumSink};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward FFT of every frame, reported with the latest pitch hint.
pub struct SpectrumProcessor {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    bin_width_hz: f32,
    hint: PitchHint,
    sink: Arc<dyn SpectrumSink>,
}

impl SpectrumProcessor {
    pub fn new(
        info: &StreamInfo,
        buffer_size: usize,
        hint: PitchHint,
        sink: Arc<dyn SpectrumSink>,
    ) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(buffer_size),
            buffer: vec![Complex::new(0.0, 0.0); buffer_size],
            bin_width_hz: info.format.sample_rate as f32 / buffer_size as f32,
            hint,
            sink,
        }
    }

    /// Magnitudes of bins `0..buffer_size/2` for `samples`.
    pub fn magnitudes(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        if samples.len() != self.buffer.len() {
            return Err(PitchscopeError::Other(format!(
                "spectrum expects {} samples, got {}",
                self.buffer.len(),
                samples.len()
            )));
        }
        for (slot, &s) in self.buffer.iter_mut().zip(samples) {
            *slot = Complex::new(s, 0.0);
        }
        self.fft.process(&mut self.buffer);
        Ok(self.buffer[..self.buffer.len() / 2]
            .iter()
            .map(|c| c.norm())
            .collect())
    }
}

impl Processor for SpectrumProcessor {
    fn name(&self) -> &str {
        "spectrum"
    }

    fn process_full(&mut self, frame: &Frame) -> Result<ProcessorAction> {
        let magnitudes = self.magnitudes(&frame.samples)?;
        self.sink.on_spectrum(&SpectrumEvent {
            pitch_hint: self.hint.get(),
            magnitudes,
            bin_width_hz: self.bin_width_hz,
            timestamp: frame.timestamp(),
        });
        Ok(ProcessorAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::AudioFormat;
    use crate::dispatch::buffer::{FrameGeometry, OverlapFrameBuffer};
    use crate::sink::CollectorSink;
    use std::f32::consts::TAU;

    #[test]
    fn peak_bin_matches_tone() {
        let info = StreamInfo::live(AudioFormat::pcm16(8000));
        let sink = Arc::new(CollectorSink::new());
        let hint = PitchHint::new();
        hint.set(1000.0);
        let mut processor = SpectrumProcessor::new(&info, 512, hint, sink.clone());

        // 1000 Hz at 8 kHz over 512 samples lands exactly on bin 64.
        let tone: Vec<f32> = (0..512)
            .map(|i| (TAU * 1000.0 * i as f32 / 8000.0).sin())
            .collect();
        let mut buffer = OverlapFrameBuffer::new(FrameGeometry::new(512, 0).unwrap(), info.format);
        let (_, frame) = buffer.push(&tone);
        processor.process_full(frame.unwrap()).unwrap();

        let spectra = sink.spectra();
        assert_eq!(spectra.len(), 1);
        let event = &spectra[0];
        assert_eq!(event.magnitudes.len(), 256);
        assert_eq!(event.bin_width_hz, 15.625);
        assert_eq!(event.pitch_hint, 1000.0);
        let peak = event.peak_frequency().unwrap();
        assert!((peak - 1000.0).abs() < 16.0, "peak at {}", peak);
    }

    #[test]
    fn wrong_length_is_an_error() {
        let info = StreamInfo::live(AudioFormat::pcm16(8000));
        let mut processor =
            SpectrumProcessor::new(&info, 64, PitchHint::new(), Arc::new(CollectorSink::new()));
        assert!(processor.magnitudes(&[0.0; 32]).is_err());
        assert_eq!(processor.magnitudes(&[0.0; 64]).unwrap(), vec![0.0; 32]);
    }
}
