use crate::audio::format::AudioFormat;
use crate::defaults;
use crate::error::{PitchscopeError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for anything that produces a mono sample stream.
///
/// This trait allows swapping implementations (capture device, file, tone, mock).
/// A source is opened once, read until it reports end-of-stream (or until the
/// dispatcher stops), then closed exactly once.
pub trait SampleSource: Send {
    /// Human-readable name used in errors and logs.
    fn name(&self) -> String;

    /// Acquire the underlying handle (device line, file) and report the stream format.
    fn open(&mut self) -> Result<StreamInfo>;

    /// Read the next chunk of samples.
    ///
    /// Blocks until data is available, the stream ends, or `stop` fires.
    /// Sources that block must wake up when `stop` fires and may then return
    /// an empty chunk.
    fn read_chunk(&mut self, stop: &StopSignal) -> Result<Chunk>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn close(&mut self);
}

/// Format and length information reported by [`SampleSource::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub format: AudioFormat,
    /// Total number of samples for finite sources, `None` for live input.
    pub total_samples: Option<u64>,
}

impl StreamInfo {
    /// Info for a live stream of unknown length.
    pub fn live(format: AudioFormat) -> Self {
        Self {
            format,
            total_samples: None,
        }
    }

    /// Info for a finite stream of `total_samples` samples.
    pub fn finite(format: AudioFormat, total_samples: u64) -> Self {
        Self {
            format,
            total_samples: Some(total_samples),
        }
    }
}

/// A batch of samples pulled from a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub samples: Vec<f32>,
    /// Set when no samples will follow this chunk.
    pub end_of_stream: bool,
}

impl Chunk {
    /// A chunk with more data to follow.
    pub fn data(samples: Vec<f32>) -> Self {
        Self {
            samples,
            end_of_stream: false,
        }
    }

    /// The final chunk of a stream (may be empty).
    pub fn last(samples: Vec<f32>) -> Self {
        Self {
            samples,
            end_of_stream: true,
        }
    }

    /// An empty end-of-stream marker.
    pub fn end() -> Self {
        Self::last(Vec::new())
    }
}

/// Cancellation signal shared between a dispatcher, its handle and its source.
///
/// Stopping sets a flag and drops the only sender of an internal channel, so a
/// source blocked in `select!` on [`StopSignal::closed`] wakes immediately.
#[derive(Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    closed: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(tx))),
            closed: rx,
        }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let mut guard = match self.trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Receiver that disconnects once the signal fires; use it in `select!`.
    pub fn closed(&self) -> &Receiver<()> {
        &self.closed
    }

    /// Sleep for up to `timeout`, returning early if stopped.
    ///
    /// Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.closed.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_stopped(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared open/close counters for verifying source ownership in tests.
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    open_now: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
}

impl SourceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of closes.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of sources that were open at the same time.
    pub fn max_concurrently_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

/// How a [`MockSampleSource`] behaves once its samples run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exhaustion {
    /// Report end-of-stream.
    End,
    /// Start again from the first sample (a never-ending stream).
    Repeat,
    /// Block in `read_chunk` until stopped, like an idle capture line.
    Block,
}

/// Mock sample source for testing
#[derive(Debug, Clone)]
pub struct MockSampleSource {
    name: String,
    samples: Vec<f32>,
    chunk_size: usize,
    position: usize,
    chunks_read: usize,
    sample_rate: u32,
    exhaustion: Exhaustion,
    pace: Option<Duration>,
    should_fail_open: bool,
    fail_read_at: Option<usize>,
    error_message: String,
    probe: SourceProbe,
    is_open: bool,
}

impl MockSampleSource {
    /// Create a mock that yields `samples` once, then ends.
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            name: "mock".to_string(),
            samples,
            chunk_size: defaults::CHUNK_SIZE,
            position: 0,
            chunks_read: 0,
            sample_rate: defaults::SAMPLE_RATE,
            exhaustion: Exhaustion::End,
            pace: None,
            should_fail_open: false,
            fail_read_at: None,
            error_message: "mock source error".to_string(),
            probe: SourceProbe::new(),
            is_open: false,
        }
    }

    /// Configure the source name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Configure how many samples each read returns
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Configure the reported sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Loop the samples forever instead of ending
    pub fn repeating(mut self) -> Self {
        self.exhaustion = Exhaustion::Repeat;
        self
    }

    /// Block until stopped once the samples run out
    pub fn blocking_when_drained(mut self) -> Self {
        self.exhaustion = Exhaustion::Block;
        self
    }

    /// Sleep (interruptibly) before every chunk, like a real-time device
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Configure the mock to fail on open
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }

    /// Configure the mock to fail on the `n`th read (zero-based)
    pub fn with_read_failure_at(mut self, n: usize) -> Self {
        self.fail_read_at = Some(n);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Share open/close counters with the caller
    pub fn with_probe(mut self, probe: SourceProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Check if the source is currently open
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    fn next_slice(&mut self) -> Vec<f32> {
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let slice = self.samples[self.position..end].to_vec();
        self.position = end;
        slice
    }
}

impl SampleSource for MockSampleSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self) -> Result<StreamInfo> {
        if self.should_fail_open {
            return Err(PitchscopeError::SourceUnavailable {
                source_name: self.name.clone(),
                message: self.error_message.clone(),
            });
        }
        self.is_open = true;
        self.position = 0;
        self.chunks_read = 0;
        self.probe.record_open();

        let format = AudioFormat::pcm16(self.sample_rate);
        Ok(match self.exhaustion {
            Exhaustion::End => StreamInfo::finite(format, self.samples.len() as u64),
            Exhaustion::Repeat | Exhaustion::Block => StreamInfo::live(format),
        })
    }

    fn read_chunk(&mut self, stop: &StopSignal) -> Result<Chunk> {
        let index = self.chunks_read;
        self.chunks_read += 1;

        if self.fail_read_at == Some(index) {
            return Err(PitchscopeError::SourceReadFailure {
                source_name: self.name.clone(),
                message: self.error_message.clone(),
            });
        }

        if let Some(pace) = self.pace
            && stop.wait_timeout(pace)
        {
            return Ok(Chunk::default());
        }

        if self.position >= self.samples.len() {
            match self.exhaustion {
                Exhaustion::End => return Ok(Chunk::end()),
                Exhaustion::Repeat if !self.samples.is_empty() => self.position = 0,
                Exhaustion::Repeat => return Ok(Chunk::default()),
                Exhaustion::Block => {
                    // Wakes only when the stop signal disconnects the channel.
                    stop.closed().recv().ok();
                    return Ok(Chunk::default());
                }
            }
        }

        let slice = self.next_slice();
        if self.exhaustion == Exhaustion::End && self.position >= self.samples.len() {
            Ok(Chunk::last(slice))
        } else {
            Ok(Chunk::data(slice))
        }
    }

    fn close(&mut self) {
        if self.is_open {
            self.is_open = false;
            self.probe.record_close();
        }
    }
}
