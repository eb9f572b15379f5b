//! pitchscope - overlapping-frame audio dispatch with live pitch analysis
//!
//! Reads samples from a microphone, a WAV file or a synthetic tone, slices
//! them into overlapping frames and hands every frame to a chain of
//! processors (pitch detection, spectrum, playback).

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod app;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod processors;
pub mod sink;

// Core traits (source → process → sink)
pub use audio::source::{SampleSource, StreamInfo};
pub use dispatch::chain::{Processor, ProcessorAction};
pub use processors::playback::PlaybackSink;
pub use sink::{CollectorSink, PitchSink, SpectrumSink, StdoutSink};

// Dispatch
pub use dispatch::buffer::{Frame, FrameGeometry, OverlapFrameBuffer};
pub use dispatch::controller::{ControllerConfig, PipelineController, ProcessorSpec};
pub use dispatch::dispatcher::{DispatchReport, Dispatcher, DispatcherHandle, DispatcherState};

// Analysis
pub use processors::pitch::{PitchAlgorithm, PitchEstimate};

// Error handling
pub use error::{PitchscopeError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
