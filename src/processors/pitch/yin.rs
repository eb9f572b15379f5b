//! YIN pitch estimation (de Cheveigné & Kawahara, 2002).
//!
//! Steps:
//! 1. **Difference function** - d(τ) = Σ(x[j] - x[j+τ])² over the first half of the frame
//! 2. **Cumulative mean normalized difference** - d'(τ) = d(τ) · τ / Σ d(1..τ)
//! 3. **Absolute threshold** - first local minimum with d'(τ) below the threshold
//! 4. **Parabolic interpolation** - sub-sample period
//!
//! The FFT variant computes step 1 through the identity
//! d(τ) = r(0) + r_τ(0) - 2·r(τ), with the autocorrelation r taken from
//! IFFT(conj(FFT(head)) · FFT(frame)).

use super::PitchEstimate;
use crate::defaults;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// FFT plans and scratch space for the fast difference function.
struct FftState {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    frame: Vec<Complex<f32>>,
    head: Vec<Complex<f32>>,
}

impl FftState {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
            frame: vec![Complex::new(0.0, 0.0); size],
            head: vec![Complex::new(0.0, 0.0); size],
        }
    }
}

pub struct Yin {
    sample_rate: f32,
    threshold: f32,
    /// d(τ), then d'(τ) in place, for τ in 0..buffer_size/2.
    buffer: Vec<f32>,
    fft: Option<FftState>,
}

impl Yin {
    pub fn new(sample_rate: f32, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            threshold: defaults::YIN_THRESHOLD,
            buffer: vec![0.0; buffer_size / 2],
            fft: None,
        }
    }

    /// YIN with the FFT-based difference function.
    pub fn with_fft(sample_rate: f32, buffer_size: usize) -> Self {
        Self {
            fft: Some(FftState::new(buffer_size)),
            ..Self::new(sample_rate, buffer_size)
        }
    }

    pub fn estimate(&mut self, samples: &[f32]) -> PitchEstimate {
        let half = self.buffer.len();
        if half < 3 || samples.len() < half * 2 {
            return PitchEstimate::unpitched();
        }

        if self.fft.is_some() {
            self.difference_fft(samples);
        } else {
            self.difference(samples);
        }
        self.cumulative_mean_normalized_difference();

        let Some(tau) = self.absolute_threshold() else {
            return PitchEstimate::unpitched();
        };
        let probability = (1.0 - self.buffer[tau]).clamp(0.0, 1.0);
        let period = self.parabolic_interpolation(tau);
        if period <= 0.0 {
            return PitchEstimate::unpitched();
        }
        PitchEstimate::pitched(self.sample_rate / period, probability)
    }

    fn difference(&mut self, samples: &[f32]) {
        let half = self.buffer.len();
        for tau in 0..half {
            self.buffer[tau] = samples[..half]
                .iter()
                .zip(&samples[tau..tau + half])
                .map(|(a, b)| {
                    let delta = a - b;
                    delta * delta
                })
                .sum();
        }
    }

    fn difference_fft(&mut self, samples: &[f32]) {
        let half = self.buffer.len();
        let Some(state) = self.fft.as_mut() else {
            return;
        };
        let size = state.frame.len();

        for (slot, &s) in state.frame.iter_mut().zip(samples) {
            *slot = Complex::new(s, 0.0);
        }
        for (i, slot) in state.head.iter_mut().enumerate() {
            *slot = Complex::new(if i < half { samples[i] } else { 0.0 }, 0.0);
        }
        state.forward.process(&mut state.frame);
        state.forward.process(&mut state.head);

        // Cross-correlation of the first half against the whole frame.
        // For τ < half no index wraps, so the circular result is exact.
        for (f, h) in state.frame.iter_mut().zip(&state.head) {
            *f = h.conj() * *f;
        }
        state.inverse.process(&mut state.frame);
        let scale = 1.0 / size as f32;

        let head_energy: f32 = samples[..half].iter().map(|s| s * s).sum();
        let mut shifted_energy = head_energy;
        for tau in 0..half {
            if tau > 0 {
                let out = samples[tau - 1];
                let incoming = samples[tau + half - 1];
                shifted_energy += incoming * incoming - out * out;
            }
            let correlation = state.frame[tau].re * scale;
            self.buffer[tau] = (head_energy + shifted_energy - 2.0 * correlation).max(0.0);
        }
    }

    fn cumulative_mean_normalized_difference(&mut self) {
        self.buffer[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..self.buffer.len() {
            running_sum += self.buffer[tau];
            if running_sum > 1e-10 {
                self.buffer[tau] *= tau as f32 / running_sum;
            } else {
                self.buffer[tau] = 1.0;
            }
        }
    }

    /// First τ (from 2) below the threshold, walked down to its local minimum.
    fn absolute_threshold(&self) -> Option<usize> {
        let half = self.buffer.len();
        let mut tau = 2;
        while tau < half {
            if self.buffer[tau] < self.threshold {
                while tau + 1 < half && self.buffer[tau + 1] < self.buffer[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }
        None
    }

    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        let last = self.buffer.len() - 1;
        let x0 = if tau < 1 { tau } else { tau - 1 };
        let x2 = if tau < last { tau + 1 } else { tau };

        if x0 == tau {
            return if self.buffer[tau] <= self.buffer[x2] {
                tau as f32
            } else {
                x2 as f32
            };
        }
        if x2 == tau {
            return if self.buffer[tau] <= self.buffer[x0] {
                tau as f32
            } else {
                x0 as f32
            };
        }

        let s0 = self.buffer[x0];
        let s1 = self.buffer[tau];
        let s2 = self.buffer[x2];
        let denominator = 2.0 * (2.0 * s1 - s2 - s0);
        if denominator.abs() > 1e-10 {
            tau as f32 + (s2 - s0) / denominator
        } else {
            tau as f32
        }
    }
}
