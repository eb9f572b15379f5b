//! Average magnitude difference function.

use super::PitchEstimate;

const DEFAULT_MIN_FREQUENCY: f32 = 40.0;
const DEFAULT_MAX_FREQUENCY: f32 = 1000.0;
/// How far above the cutoff the AMDF maximum must be for a valid dip.
const RATIO: f32 = 5.0;
/// Position of the dip cutoff between the AMDF minimum and maximum.
const SENSITIVITY: f32 = 0.1;

pub struct Amdf {
    sample_rate: f32,
    min_period: usize,
    max_period: usize,
    amd: Vec<f32>,
}

impl Amdf {
    pub fn new(sample_rate: f32, buffer_size: usize) -> Self {
        Self::with_range(
            sample_rate,
            buffer_size,
            DEFAULT_MIN_FREQUENCY,
            DEFAULT_MAX_FREQUENCY,
        )
    }

    pub fn with_range(
        sample_rate: f32,
        buffer_size: usize,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Self {
        let max_period = ((sample_rate / min_frequency).round() as usize).min(buffer_size.saturating_sub(1));
        let min_period = ((sample_rate / max_frequency).round() as usize).max(1);
        Self {
            sample_rate,
            min_period,
            max_period,
            amd: vec![0.0; max_period + 1],
        }
    }

    pub fn estimate(&mut self, samples: &[f32]) -> PitchEstimate {
        if self.max_period <= self.min_period || samples.len() <= self.max_period {
            return PitchEstimate::unpitched();
        }

        let mut max_value = f32::MIN;
        let mut min_value = f32::MAX;
        for lag in 0..=self.max_period {
            let total: f32 = samples[lag..]
                .iter()
                .zip(samples)
                .map(|(a, b)| (a - b).abs())
                .sum();
            // Normalize by overlap length so long lags are not favoured.
            let value = total / (samples.len() - lag) as f32;
            self.amd[lag] = value;
            max_value = max_value.max(value);
            min_value = min_value.min(value);
        }
        if max_value <= f32::EPSILON {
            return PitchEstimate::unpitched();
        }

        let cutoff = SENSITIVITY * (max_value - min_value) + min_value;
        let mut lag = self.min_period;
        while lag < self.max_period && self.amd[lag] > cutoff {
            lag += 1;
        }

        // Settle on the bottom of the dip that crossed the cutoff.
        let search_end = (lag + self.min_period / 2).min(self.max_period);
        let mut best = lag;
        for candidate in lag.saturating_sub(1).max(self.min_period)..=search_end {
            if self.amd[candidate] < self.amd[best] {
                best = candidate;
            }
        }

        if self.amd[best] * RATIO < max_value && self.amd[best] <= cutoff {
            let confidence = (1.0 - self.amd[best] / max_value).clamp(0.0, 1.0);
            PitchEstimate::pitched(self.sample_rate / best as f32, confidence)
        } else {
            PitchEstimate::unpitched()
        }
    }
}
