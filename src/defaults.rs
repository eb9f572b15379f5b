//! Default configuration constants for pitchscope.
//!
//! Shared by the config layer, the CLI and the processors so the same
//! numbers are not repeated in several places.

use std::time::Duration;

/// Default capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Default frame length in samples.
///
/// 4096 samples at 44.1kHz is ~93ms, long enough for two periods of a
/// 25Hz tone, which covers the lowest pitch any estimator looks for.
pub const BUFFER_SIZE: usize = 4096;

/// Default number of samples shared between consecutive frames.
///
/// Three quarters of [`BUFFER_SIZE`], giving a step of 1024 samples (~23ms).
pub const OVERLAP: usize = 3072;

/// Number of samples a source hands out per `read_chunk` call.
pub const CHUNK_SIZE: usize = 1024;

/// How long the controller waits for a stopping dispatcher before giving up.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded capacity (in chunks) between a capture callback and the dispatcher.
pub const CAPTURE_QUEUE_CHUNKS: usize = 64;

/// Name of the dispatch thread.
pub const DISPATCH_THREAD_NAME: &str = "audio-dispatch";

/// Default YIN absolute threshold.
pub const YIN_THRESHOLD: f32 = 0.20;

/// Frequency reported when a frame carries no pitch.
pub const NO_PITCH: f32 = -1.0;

/// Convert a duration to a sample count at the given rate.
pub fn samples_for(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * sample_rate as f64).round() as u64
}
