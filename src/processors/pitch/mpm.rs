//! McLeod Pitch Method.
//!
//! Normalized square difference n(τ) = 2·r(τ) / m(τ), key maxima between
//! positive and negative zero crossings, first key maximum above
//! `CUTOFF × highest`.

use super::PitchEstimate;

/// Fraction of the highest key maximum a candidate must reach.
const CUTOFF: f32 = 0.97;
/// Key maxima below this are ignored entirely.
const SMALL_CUTOFF: f32 = 0.5;
/// Estimates below this frequency (Hz) are reported as unpitched.
const LOWER_PITCH_CUTOFF: f32 = 80.0;

pub struct Mpm {
    sample_rate: f32,
    nsdf: Vec<f32>,
    max_positions: Vec<usize>,
}

impl Mpm {
    pub fn new(sample_rate: f32, buffer_size: usize) -> Self {
        // Lags past two periods of the lowest accepted pitch add nothing.
        let max_lag = ((2.0 * sample_rate / LOWER_PITCH_CUTOFF) as usize + 2).min(buffer_size);
        Self {
            sample_rate,
            nsdf: vec![0.0; max_lag],
            max_positions: Vec::new(),
        }
    }

    pub fn estimate(&mut self, samples: &[f32]) -> PitchEstimate {
        if self.nsdf.len() < 3 || samples.len() < self.nsdf.len() {
            return PitchEstimate::unpitched();
        }

        self.normalized_square_difference(samples);
        self.peak_picking();
        if self.max_positions.is_empty() {
            return PitchEstimate::unpitched();
        }

        let mut highest = f32::MIN;
        let mut estimates = Vec::with_capacity(self.max_positions.len());
        for &tau in &self.max_positions {
            let (x, y) = self.parabolic_turning_point(tau);
            highest = highest.max(y);
            if y > SMALL_CUTOFF {
                estimates.push((x, y));
            }
        }
        if estimates.is_empty() {
            return PitchEstimate::unpitched();
        }

        let cutoff = CUTOFF * highest;
        let Some(&(period, _)) = estimates.iter().find(|(_, y)| *y >= cutoff) else {
            return PitchEstimate::unpitched();
        };
        if period <= 0.0 {
            return PitchEstimate::unpitched();
        }
        let frequency = self.sample_rate / period;
        if frequency > LOWER_PITCH_CUTOFF {
            PitchEstimate::pitched(frequency, highest.clamp(0.0, 1.0))
        } else {
            PitchEstimate::unpitched()
        }
    }

    fn normalized_square_difference(&mut self, samples: &[f32]) {
        let n = samples.len();
        for tau in 0..self.nsdf.len() {
            let mut acf = 0.0f32;
            let mut divisor = 0.0f32;
            for i in 0..n - tau {
                acf += samples[i] * samples[i + tau];
                divisor += samples[i] * samples[i] + samples[i + tau] * samples[i + tau];
            }
            self.nsdf[tau] = if divisor > 0.0 { 2.0 * acf / divisor } else { 0.0 };
        }
    }

    /// Record the highest local maximum of each positive lobe after the first
    /// negative-going zero crossing.
    fn peak_picking(&mut self) {
        self.max_positions.clear();
        let nsdf = &self.nsdf;
        let last = nsdf.len() - 1;
        let mut pos = 0;
        let mut current_max = 0;

        while pos < last / 3 && nsdf[pos] > 0.0 {
            pos += 1;
        }
        while pos < last && nsdf[pos] <= 0.0 {
            pos += 1;
        }
        if pos == 0 {
            pos = 1;
        }

        while pos < last {
            if nsdf[pos] > nsdf[pos - 1]
                && nsdf[pos] >= nsdf[pos + 1]
                && (current_max == 0 || nsdf[pos] > nsdf[current_max])
            {
                current_max = pos;
            }
            pos += 1;
            if pos < last && nsdf[pos] <= 0.0 {
                if current_max > 0 {
                    self.max_positions.push(current_max);
                    current_max = 0;
                }
                while pos < last && nsdf[pos] <= 0.0 {
                    pos += 1;
                }
            }
        }
        if current_max > 0 {
            self.max_positions.push(current_max);
        }
    }

    fn parabolic_turning_point(&self, tau: usize) -> (f32, f32) {
        let bottom = self.nsdf[tau - 1];
        let middle = self.nsdf[tau];
        let top = self.nsdf[tau + 1];
        let denominator = top + bottom - 2.0 * middle;
        if denominator.abs() < 1e-12 {
            return (tau as f32, middle);
        }
        let delta = bottom - top;
        let x = tau as f32 + delta / (2.0 * denominator);
        let y = middle - delta * delta / (8.0 * denominator);
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (TAU * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn detects_sine_frequencies() {
        for freq in [110.0f32, 220.0, 440.0, 880.0] {
            let mut mpm = Mpm::new(44_100.0, 2048);
            let estimate = mpm.estimate(&sine(freq, 44_100.0, 2048));
            assert!(estimate.pitched, "no pitch for {}", freq);
            assert!(
                (estimate.frequency - freq).abs() / freq < 0.01,
                "expected {} got {}",
                freq,
                estimate.frequency
            );
            assert!(estimate.probability > 0.9);
        }
    }

    #[test]
    fn silence_is_unpitched() {
        let mut mpm = Mpm::new(44_100.0, 1024);
        assert!(!mpm.estimate(&[0.0; 1024]).pitched);
    }

    #[test]
    fn below_lower_cutoff_is_unpitched() {
        // A 50 Hz tone sits under the 80 Hz floor.
        let mut mpm = Mpm::new(8_000.0, 1024);
        assert!(!mpm.estimate(&sine(50.0, 8_000.0, 1024)).pitched);
    }
}
