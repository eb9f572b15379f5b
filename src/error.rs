//! Error types for pitchscope.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PitchscopeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid frame geometry: overlap {overlap} must be smaller than buffer size {buffer_size}")]
    InvalidGeometry { buffer_size: usize, overlap: usize },

    // Sample source errors
    #[error("Sample source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Sample source '{source_name}' failed while reading: {message}")]
    SourceReadFailure {
        source_name: String,
        message: String,
    },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    // Processing errors
    #[error("Processor '{processor}' failed on frame {frame}: {message}")]
    ProcessorFault {
        processor: String,
        frame: u64,
        message: String,
    },

    #[error("Invalid processor spec: {message}")]
    InvalidProcessorSpec { message: String },

    #[error("Playback failed: {message}")]
    Playback { message: String },

    // Lifecycle errors
    #[error("Previous dispatcher did not stop within {timeout:?}")]
    ReconfigurationTimeout { timeout: Duration },

    #[error("Dispatch thread '{thread}' panicked: {message}")]
    DispatchPanicked { thread: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl PitchscopeError {
    /// Returns true for errors that leave the pipeline usable after a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PitchscopeError::SourceUnavailable { .. }
                | PitchscopeError::AudioDeviceNotFound { .. }
                | PitchscopeError::ReconfigurationTimeout { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PitchscopeError>;
