//! Sliding-window frame buffer.
//!
//! Turns an arbitrary sequence of sample chunks into fixed-size frames that
//! overlap by a configured number of samples.

use crate::audio::format::AudioFormat;
use crate::defaults;
use crate::error::{PitchscopeError, Result};

/// Frame length and overlap, validated so that `overlap < buffer_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    buffer_size: usize,
    overlap: usize,
}

impl FrameGeometry {
    pub fn new(buffer_size: usize, overlap: usize) -> Result<Self> {
        if buffer_size == 0 || overlap >= buffer_size {
            return Err(PitchscopeError::InvalidGeometry {
                buffer_size,
                overlap,
            });
        }
        Ok(Self {
            buffer_size,
            overlap,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// New samples consumed per frame.
    pub fn step(&self) -> usize {
        self.buffer_size - self.overlap
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            buffer_size: defaults::BUFFER_SIZE,
            overlap: defaults::OVERLAP,
        }
    }
}

/// One emitted frame, valid until the next call into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Zero-based position of this frame in the stream.
    pub index: u64,
    /// Exactly `buffer_size` normalized samples.
    pub samples: Vec<f32>,
    /// The same samples in the stream's raw encoding.
    pub bytes: Vec<u8>,
    /// Real samples this frame added; less than `step` only for the padded final frame.
    pub new_samples: usize,
    /// Stream samples consumed up to and including this frame.
    pub consumed: u64,
    /// Index of the first new sample within `samples`.
    pub new_offset: usize,
    format: AudioFormat,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Stream time (seconds) at the end of this frame's real samples.
    pub fn timestamp(&self) -> f64 {
        self.consumed as f64 / self.format.sample_rate as f64
    }

    /// Raw bytes of only the real samples this frame introduced.
    pub fn new_bytes(&self) -> &[u8] {
        let width = self.format.bytes_per_sample();
        let start = self.new_offset * width;
        &self.bytes[start..start + self.new_samples * width]
    }

    /// True for the zero-padded frame that closes a finite stream.
    pub fn is_padded(&self, step: usize) -> bool {
        self.new_samples < step
    }
}

/// Rolling window that emits a frame every `step` samples.
///
/// The window starts zero-filled, so the first frame holds `overlap` zeros
/// followed by the first `step` samples of the stream. After every emission
/// the window slides forward by `step`, keeping the last `overlap` samples.
pub struct OverlapFrameBuffer {
    geometry: FrameGeometry,
    window: Vec<f32>,
    /// Samples written into the current step so far.
    filled: usize,
    consumed: u64,
    emitted: u64,
    finished: bool,
    frame: Frame,
}

impl OverlapFrameBuffer {
    pub fn new(geometry: FrameGeometry, format: AudioFormat) -> Self {
        let size = geometry.buffer_size();
        Self {
            geometry,
            window: vec![0.0; size],
            filled: 0,
            consumed: 0,
            emitted: 0,
            finished: false,
            frame: Frame {
                index: 0,
                samples: vec![0.0; size],
                bytes: Vec::with_capacity(size * format.bytes_per_sample()),
                new_samples: 0,
                consumed: 0,
                new_offset: geometry.overlap(),
                format,
            },
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Frames emitted so far.
    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    /// Stream samples accepted so far.
    pub fn samples_consumed(&self) -> u64 {
        self.consumed
    }

    /// Append samples, consuming at most what the current step still needs.
    ///
    /// Returns how many samples were consumed and the frame, if this call
    /// completed a step. Callers loop until the input slice is drained.
    /// After [`finish`](Self::finish) nothing is consumed.
    pub fn push(&mut self, samples: &[f32]) -> (usize, Option<&Frame>) {
        if self.finished {
            return (0, None);
        }

        let step = self.geometry.step();
        let overlap = self.geometry.overlap();
        let take = samples.len().min(step - self.filled);
        let start = overlap + self.filled;
        self.window[start..start + take].copy_from_slice(&samples[..take]);
        self.filled += take;
        self.consumed += take as u64;

        if self.filled < step {
            return (take, None);
        }
        (take, Some(self.emit(step)))
    }

    /// Flush a partial step as one zero-padded frame. Emits at most once.
    pub fn finish(&mut self) -> Option<&Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if self.filled == 0 {
            return None;
        }
        let real = self.filled;
        let overlap = self.geometry.overlap();
        self.window[overlap + real..].fill(0.0);
        Some(self.emit(real))
    }

    fn emit(&mut self, new_samples: usize) -> &Frame {
        let step = self.geometry.step();

        self.frame.index = self.emitted;
        self.frame.samples.copy_from_slice(&self.window);
        self.frame.bytes.clear();
        self.frame
            .format
            .encode_into(&self.window, &mut self.frame.bytes);
        self.frame.new_samples = new_samples;
        self.frame.consumed = self.consumed;

        self.emitted += 1;
        self.filled = 0;
        // Keep the last `overlap` samples at the front of the window.
        self.window.copy_within(step.., 0);

        &self.frame
    }
}
