//! Synthetic sine-tone source.
//!
//! Useful for checking a pitch estimator against a known frequency without
//! any hardware, and as a stand-in input for the CLI.

use crate::audio::format::AudioFormat;
use crate::audio::source::{Chunk, SampleSource, StopSignal, StreamInfo};
use crate::defaults;
use crate::error::Result;
use std::f64::consts::TAU;
use std::time::Duration;

/// Generates `amplitude * sin(2π f t)` in chunks.
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    chunk_size: usize,
    /// Total length; `None` generates forever.
    total_samples: Option<u64>,
    /// Pace reads at real-time speed.
    realtime: bool,
    position: u64,
}

impl ToneSource {
    /// A never-ending tone at the default sample rate.
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            amplitude: 0.8,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_size: defaults::CHUNK_SIZE,
            total_samples: None,
            realtime: false,
            position: 0,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stop after `duration` of audio.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_samples = Some(defaults::samples_for(duration, self.sample_rate));
        self
    }

    /// Stop after exactly `samples` samples.
    pub fn with_total_samples(mut self, samples: u64) -> Self {
        self.total_samples = Some(samples);
        self
    }

    /// Sleep between chunks so the tone arrives at playback speed.
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    fn sample_at(&self, n: u64) -> f32 {
        let t = n as f64 / self.sample_rate as f64;
        (self.amplitude as f64 * (TAU * self.frequency as f64 * t).sin()) as f32
    }
}

impl SampleSource for ToneSource {
    fn name(&self) -> String {
        format!("tone:{}Hz", self.frequency)
    }

    fn open(&mut self) -> Result<StreamInfo> {
        self.position = 0;
        let format = AudioFormat::pcm16(self.sample_rate);
        Ok(match self.total_samples {
            Some(total) => StreamInfo::finite(format, total),
            None => StreamInfo::live(format),
        })
    }

    fn read_chunk(&mut self, stop: &StopSignal) -> Result<Chunk> {
        if self.realtime {
            let period = Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64);
            if stop.wait_timeout(period) {
                return Ok(Chunk::default());
            }
        }

        let remaining = self
            .total_samples
            .map_or(self.chunk_size as u64, |total| {
                total.saturating_sub(self.position)
            });
        let count = remaining.min(self.chunk_size as u64);
        let samples: Vec<f32> = (self.position..self.position + count)
            .map(|n| self.sample_at(n))
            .collect();
        self.position += count;

        let finished = self
            .total_samples
            .is_some_and(|total| self.position >= total);
        Ok(if finished {
            Chunk::last(samples)
        } else {
            Chunk::data(samples)
        })
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_tone_ends_after_total_samples() {
        let mut tone = ToneSource::new(440.0)
            .with_chunk_size(100)
            .with_total_samples(250);
        let stop = StopSignal::new();
        let info = tone.open().unwrap();
        assert_eq!(info.total_samples, Some(250));

        let sizes: Vec<(usize, bool)> = (0..3)
            .map(|_| {
                let c = tone.read_chunk(&stop).unwrap();
                (c.samples.len(), c.end_of_stream)
            })
            .collect();
        assert_eq!(sizes, vec![(100, false), (100, false), (50, true)]);
    }

    #[test]
    fn tone_starts_at_zero_phase_and_respects_amplitude() {
        let mut tone = ToneSource::new(1000.0)
            .with_sample_rate(8000)
            .with_amplitude(0.5)
            .with_chunk_size(8);
        let stop = StopSignal::new();
        tone.open().unwrap();
        let chunk = tone.read_chunk(&stop).unwrap();
        assert!(chunk.samples[0].abs() < 1e-6);
        // Quarter period at 1kHz/8kHz is sample 2.
        assert!((chunk.samples[2] - 0.5).abs() < 1e-4);
        assert!(chunk.samples.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn duration_converts_to_samples() {
        let mut tone = ToneSource::new(220.0)
            .with_sample_rate(16_000)
            .with_duration(Duration::from_millis(250));
        let info = tone.open().unwrap();
        assert_eq!(info.total_samples, Some(4000));
    }

    #[test]
    fn realtime_tone_wakes_on_stop() {
        let mut tone = ToneSource::new(220.0)
            .with_sample_rate(1000)
            .with_chunk_size(10_000)
            .realtime();
        let stop = StopSignal::new();
        tone.open().unwrap();
        stop.stop();
        let chunk = tone.read_chunk(&stop).unwrap();
        assert!(chunk.samples.is_empty());
    }
}
