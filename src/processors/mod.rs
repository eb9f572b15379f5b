//! Frame processors: pitch estimation, spectrum analysis and playback.

pub mod pitch;
pub mod playback;
pub mod spectrum;

pub use pitch::{PitchAlgorithm, PitchEstimate, PitchEstimator, PitchHint, PitchProcessor};
pub use playback::{MemoryPlaybackSink, PlaybackProcessor, PlaybackSink, WavWriterSink};
pub use spectrum::SpectrumProcessor;
