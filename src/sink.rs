//! Analysis events and the sinks that receive them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// One pitch estimate, emitted for every frame a pitch processor sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEvent {
    /// Estimated fundamental in Hz, or -1 when the frame is unpitched.
    pub frequency: f32,
    /// Algorithm-specific confidence in [0, 1].
    pub confidence: f32,
    /// Stream time in seconds at the end of the frame.
    pub timestamp: f64,
    /// Fraction of a finite stream consumed so far; `None` for live input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    pub pitched: bool,
}

impl fmt::Display for PitchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>9.3}s  ", self.timestamp)?;
        if self.pitched {
            write!(f, "{:>8.2} Hz  ({:.2})", self.frequency, self.confidence)?;
        } else {
            write!(f, "{:>8} Hz", "--")?;
        }
        if let Some(progress) = self.progress {
            write!(f, "  [{:>3.0}%]", progress * 100.0)?;
        }
        Ok(())
    }
}

/// Magnitude spectrum of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumEvent {
    /// Last pitch published by a pitch processor, or -1.
    pub pitch_hint: f32,
    /// Magnitudes of bins `0..buffer_size/2`.
    pub magnitudes: Vec<f32>,
    pub bin_width_hz: f32,
    pub timestamp: f64,
}

impl SpectrumEvent {
    /// Frequency of the strongest bin, ignoring DC.
    pub fn peak_frequency(&self) -> Option<f32> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin as f32 * self.bin_width_hz)
    }
}

/// Receives pitch events from the dispatch thread.
///
/// Sinks are shared (`Arc`) and outlive any one dispatcher, so one sink keeps
/// receiving events across reconfigurations.
pub trait PitchSink: Send + Sync {
    fn on_pitch(&self, event: &PitchEvent);

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "pitch-sink"
    }
}

/// Receives spectrum events from the dispatch thread.
pub trait SpectrumSink: Send + Sync {
    fn on_spectrum(&self, event: &SpectrumEvent);

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "spectrum-sink"
    }
}

/// Sink that collects every event in memory.
#[derive(Debug, Default)]
pub struct CollectorSink {
    pitches: Mutex<Vec<PitchEvent>>,
    spectra: Mutex<Vec<SpectrumEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pitches(&self) -> Vec<PitchEvent> {
        match self.pitches.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn spectra(&self) -> Vec<SpectrumEvent> {
        match self.spectra.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Frequencies of the pitched events only.
    pub fn pitched_frequencies(&self) -> Vec<f32> {
        self.pitches()
            .iter()
            .filter(|e| e.pitched)
            .map(|e| e.frequency)
            .collect()
    }
}

impl PitchSink for CollectorSink {
    fn on_pitch(&self, event: &PitchEvent) {
        let mut guard = match self.pitches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(*event);
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

impl SpectrumSink for CollectorSink {
    fn on_spectrum(&self, event: &SpectrumEvent) {
        let mut guard = match self.spectra.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(event.clone());
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Either kind of event, tagged for JSON-lines output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Pitch(PitchEvent),
    Spectrum(SpectrumEvent),
}

/// Sink that prints events to stdout, as text or JSON lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdoutSink {
    json: bool,
    /// Print unpitched frames too.
    show_unpitched: bool,
}

impl StdoutSink {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn json() -> Self {
        Self {
            json: true,
            show_unpitched: false,
        }
    }

    pub fn with_unpitched(mut self, show: bool) -> Self {
        self.show_unpitched = show;
        self
    }

    fn print_json(&self, event: &AnalysisEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("failed to serialize event: {}", e),
        }
    }
}

impl PitchSink for StdoutSink {
    fn on_pitch(&self, event: &PitchEvent) {
        if !event.pitched && !self.show_unpitched {
            return;
        }
        if self.json {
            self.print_json(&AnalysisEvent::Pitch(*event));
        } else {
            println!("{}", event);
        }
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

impl SpectrumSink for StdoutSink {
    fn on_spectrum(&self, event: &SpectrumEvent) {
        if self.json {
            self.print_json(&AnalysisEvent::Spectrum(event.clone()));
        } else if let Some(peak) = event.peak_frequency() {
            println!(
                "{:>9.3}s  spectrum peak {:>8.2} Hz  (pitch {:.2} Hz)",
                event.timestamp, peak, event.pitch_hint
            );
        }
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}
