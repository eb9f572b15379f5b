//! Pitch estimation processors.
//!
//! [`PitchAlgorithm`] names an algorithm; [`PitchEstimator`] is the runnable
//! estimator it selects; [`PitchProcessor`] wraps an estimator into the
//! processor chain and forwards one [`PitchEvent`] per frame to a sink.

mod amdf;
mod mpm;
mod yin;

pub use amdf::Amdf;
pub use mpm::Mpm;
pub use yin::Yin;

use crate::audio::source::StreamInfo;
use crate::defaults;
use crate::dispatch::buffer::Frame;
use crate::dispatch::chain::{Processor, ProcessorAction};
use crate::error::{PitchscopeError, Result};
use crate::sink::{PitchEvent, PitchSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Selectable pitch estimation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PitchAlgorithm {
    #[default]
    Yin,
    #[serde(alias = "fft_yin", alias = "fftyin")]
    FftYin,
    Mpm,
    Amdf,
}

impl PitchAlgorithm {
    pub const ALL: [PitchAlgorithm; 4] = [
        PitchAlgorithm::Yin,
        PitchAlgorithm::FftYin,
        PitchAlgorithm::Mpm,
        PitchAlgorithm::Amdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PitchAlgorithm::Yin => "yin",
            PitchAlgorithm::FftYin => "fft-yin",
            PitchAlgorithm::Mpm => "mpm",
            PitchAlgorithm::Amdf => "amdf",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PitchAlgorithm::Yin => "YIN cumulative mean normalized difference",
            PitchAlgorithm::FftYin => "YIN with an FFT-based difference function",
            PitchAlgorithm::Mpm => "McLeod pitch method (normalized square difference)",
            PitchAlgorithm::Amdf => "Average magnitude difference function",
        }
    }
}

impl fmt::Display for PitchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PitchAlgorithm {
    type Err = PitchscopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "yin" => Ok(PitchAlgorithm::Yin),
            "fft-yin" | "fftyin" => Ok(PitchAlgorithm::FftYin),
            "mpm" | "mcleod" => Ok(PitchAlgorithm::Mpm),
            "amdf" => Ok(PitchAlgorithm::Amdf),
            other => Err(PitchscopeError::ConfigInvalidValue {
                key: "algorithm".to_string(),
                message: format!(
                    "unknown pitch algorithm '{}' (expected one of: yin, fft-yin, mpm, amdf)",
                    other
                ),
            }),
        }
    }
}

/// Result of estimating one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Hz, or [`defaults::NO_PITCH`].
    pub frequency: f32,
    pub probability: f32,
    pub pitched: bool,
}

impl PitchEstimate {
    pub fn pitched(frequency: f32, probability: f32) -> Self {
        Self {
            frequency,
            probability,
            pitched: true,
        }
    }

    pub fn unpitched() -> Self {
        Self {
            frequency: defaults::NO_PITCH,
            probability: 0.0,
            pitched: false,
        }
    }
}

/// An estimator for one algorithm, sized for one frame length.
pub enum PitchEstimator {
    Yin(Yin),
    Mpm(Mpm),
    Amdf(Amdf),
}

impl PitchEstimator {
    pub fn new(algorithm: PitchAlgorithm, sample_rate: u32, buffer_size: usize) -> Self {
        let rate = sample_rate as f32;
        match algorithm {
            PitchAlgorithm::Yin => PitchEstimator::Yin(Yin::new(rate, buffer_size)),
            PitchAlgorithm::FftYin => PitchEstimator::Yin(Yin::with_fft(rate, buffer_size)),
            PitchAlgorithm::Mpm => PitchEstimator::Mpm(Mpm::new(rate, buffer_size)),
            PitchAlgorithm::Amdf => PitchEstimator::Amdf(Amdf::new(rate, buffer_size)),
        }
    }

    pub fn estimate(&mut self, samples: &[f32]) -> PitchEstimate {
        match self {
            PitchEstimator::Yin(yin) => yin.estimate(samples),
            PitchEstimator::Mpm(mpm) => mpm.estimate(samples),
            PitchEstimator::Amdf(amdf) => amdf.estimate(samples),
        }
    }
}

/// Last detected pitch, shared between processors on the same dispatcher.
#[derive(Debug, Clone)]
pub struct PitchHint(Arc<AtomicU32>);

impl PitchHint {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(defaults::NO_PITCH.to_bits())))
    }

    pub fn set(&self, frequency: f32) {
        self.0.store(frequency.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for PitchHint {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a pitch estimator on every frame.
pub struct PitchProcessor {
    name: String,
    estimator: PitchEstimator,
    sink: Arc<dyn PitchSink>,
    hint: Option<PitchHint>,
    total_samples: Option<u64>,
}

impl PitchProcessor {
    pub fn new(
        algorithm: PitchAlgorithm,
        info: &StreamInfo,
        buffer_size: usize,
        sink: Arc<dyn PitchSink>,
    ) -> Self {
        Self {
            name: format!("pitch:{}", algorithm),
            estimator: PitchEstimator::new(algorithm, info.format.sample_rate, buffer_size),
            sink,
            hint: None,
            total_samples: info.total_samples,
        }
    }

    /// Publish every detected pitch to `hint`.
    pub fn with_hint(mut self, hint: PitchHint) -> Self {
        self.hint = Some(hint);
        self
    }

    fn handle(&mut self, frame: &Frame) -> ProcessorAction {
        let estimate = self.estimator.estimate(&frame.samples);
        let progress = self
            .total_samples
            .filter(|&total| total > 0)
            .map(|total| (frame.consumed as f64 / total as f64).min(1.0) as f32);

        if estimate.pitched
            && let Some(hint) = &self.hint
        {
            hint.set(estimate.frequency);
        }
        self.sink.on_pitch(&PitchEvent {
            frequency: estimate.frequency,
            confidence: estimate.probability,
            timestamp: frame.timestamp(),
            progress,
            pitched: estimate.pitched,
        });
        ProcessorAction::Continue
    }
}

impl Processor for PitchProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_full(&mut self, frame: &Frame) -> Result<ProcessorAction> {
        Ok(self.handle(frame))
    }

    fn processing_finished(&mut self) {
        tracing::debug!(processor = %self.name, "pitch processing finished");
    }
}
