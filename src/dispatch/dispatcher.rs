//! Dispatch loop: pull chunks from a source, frame them, fan frames out.

use crate::audio::source::{SampleSource, StopSignal, StreamInfo};
use crate::defaults;
use crate::dispatch::buffer::{Frame, FrameGeometry, OverlapFrameBuffer};
use crate::dispatch::chain::{ProcessorChain, ProcessorFault, panic_message};
use crate::dispatch::error::ErrorReporter;
use crate::error::{PitchscopeError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Source open, loop not started.
    Created,
    Running,
    /// Ended by an external stop request.
    Stopped,
    /// Ended because the source ran out (or failed while reading).
    Finished,
}

impl DispatcherState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatcherState::Stopped | DispatcherState::Finished)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Created,
            1 => DispatcherState::Running,
            2 => DispatcherState::Stopped,
            _ => DispatcherState::Finished,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DispatcherState::Created => 0,
            DispatcherState::Running => 1,
            DispatcherState::Stopped => 2,
            DispatcherState::Finished => 3,
        }
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub source: String,
    pub state: DispatcherState,
    /// Frames delivered to the chain, including a padded final frame.
    pub frames: u64,
    /// Stream samples consumed.
    pub samples: u64,
    pub faults: Vec<ProcessorFault>,
    /// Set when the loop ended on a source read failure.
    pub read_error: Option<String>,
}

/// Owns one opened source, one overlap buffer and one processor chain.
pub struct Dispatcher {
    source: Box<dyn SampleSource>,
    info: StreamInfo,
    buffer: OverlapFrameBuffer,
    chain: ProcessorChain,
    reporter: Arc<dyn ErrorReporter>,
    stop: StopSignal,
    state: Arc<AtomicU8>,
}

impl Dispatcher {
    /// Open `source` and bind it to `chain`.
    ///
    /// Returns `SourceUnavailable` if the source cannot be opened.
    pub fn open(
        mut source: Box<dyn SampleSource>,
        geometry: FrameGeometry,
        chain: ProcessorChain,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let info = open_source(source.as_mut())?;
        Ok(Self::from_opened(source, info, geometry, chain, reporter))
    }

    /// Wrap a source that the caller already opened.
    pub fn from_opened(
        source: Box<dyn SampleSource>,
        info: StreamInfo,
        geometry: FrameGeometry,
        chain: ProcessorChain,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            source,
            info,
            buffer: OverlapFrameBuffer::new(geometry, info.format),
            chain,
            reporter,
            stop: StopSignal::new(),
            state: Arc::new(AtomicU8::new(DispatcherState::Created.as_u8())),
        }
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Signal that stops this dispatcher when fired.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Run the loop on the current thread until the stream ends or a stop
    /// is requested.
    pub fn run(mut self) -> DispatchReport {
        let source_name = self.source.name();
        self.set_state(DispatcherState::Running);
        tracing::info!(
            source = %source_name,
            format = %self.info.format,
            buffer_size = self.buffer.geometry().buffer_size(),
            overlap = self.buffer.geometry().overlap(),
            processors = ?self.chain.names(),
            "dispatcher started"
        );

        let mut report = DispatchReport {
            source: source_name.clone(),
            state: DispatcherState::Running,
            frames: 0,
            samples: 0,
            faults: Vec::new(),
            read_error: None,
        };

        let terminal = loop {
            if self.stop.is_stopped() {
                break DispatcherState::Stopped;
            }

            match self.source.read_chunk(&self.stop) {
                Ok(chunk) => {
                    if !self.feed(&chunk.samples, &mut report) {
                        break DispatcherState::Stopped;
                    }
                    if chunk.end_of_stream {
                        self.flush(&mut report);
                        break DispatcherState::Finished;
                    }
                }
                Err(e) => {
                    self.reporter.report(&source_name, &e);
                    report.read_error = Some(e.to_string());
                    self.flush(&mut report);
                    break DispatcherState::Finished;
                }
            }
        };

        self.chain.notify_end_of_stream();
        self.source.close();

        report.state = terminal;
        report.frames = self.buffer.frames_emitted();
        report.samples = self.buffer.samples_consumed();
        self.set_state(terminal);
        tracing::info!(
            source = %source_name,
            state = ?terminal,
            frames = report.frames,
            samples = report.samples,
            faults = report.faults.len(),
            "dispatcher ended"
        );
        report
    }

    /// Start the loop on a dedicated thread.
    pub fn spawn(self) -> Result<DispatcherHandle> {
        let stop = self.stop.clone();
        let state = Arc::clone(&self.state);
        let source_name = self.source.name();
        let (done_tx, done_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name(defaults::DISPATCH_THREAD_NAME.to_string())
            .spawn(move || {
                let report = self.run();
                if done_tx.send(report).is_err() {
                    tracing::debug!("dispatch report dropped: handle already gone");
                }
            })?;

        Ok(DispatcherHandle {
            stop,
            state,
            source_name,
            done_rx,
            thread: Some(thread),
            report: None,
        })
    }

    /// Push samples through the buffer, dispatching each completed frame.
    ///
    /// Returns false if a stop was requested before the samples were used up.
    fn feed(&mut self, samples: &[f32], report: &mut DispatchReport) -> bool {
        let mut rest = samples;
        while !rest.is_empty() {
            if self.stop.is_stopped() {
                return false;
            }
            let (taken, frame) = self.buffer.push(rest);
            if let Some(frame) = frame {
                deliver(&mut self.chain, self.reporter.as_ref(), frame, report);
            }
            if taken == 0 {
                break;
            }
            rest = &rest[taken..];
        }
        true
    }

    fn flush(&mut self, report: &mut DispatchReport) {
        if let Some(frame) = self.buffer.finish() {
            deliver(&mut self.chain, self.reporter.as_ref(), frame, report);
        }
    }
}

/// Open `source`, reporting any failure as `SourceUnavailable`.
pub(crate) fn open_source(source: &mut dyn SampleSource) -> Result<StreamInfo> {
    source.open().map_err(|e| match e {
        unavailable @ PitchscopeError::SourceUnavailable { .. } => unavailable,
        other => PitchscopeError::SourceUnavailable {
            source_name: source.name(),
            message: other.to_string(),
        },
    })
}

fn deliver(
    chain: &mut ProcessorChain,
    reporter: &dyn ErrorReporter,
    frame: &Frame,
    report: &mut DispatchReport,
) {
    let faults = chain.dispatch(frame, frame.index == 0);
    for fault in faults {
        reporter.report(&fault.processor, &PitchscopeError::from(fault.clone()));
        report.faults.push(fault);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Covers dispatchers that never ran and loops that unwound.
        self.chain.notify_end_of_stream();
        self.source.close();
    }
}

/// Control handle for a dispatcher running on its own thread.
///
/// Dropping the handle requests a stop but does not wait for the thread.
pub struct DispatcherHandle {
    stop: StopSignal,
    state: Arc<AtomicU8>,
    source_name: String,
    done_rx: Receiver<DispatchReport>,
    thread: Option<JoinHandle<()>>,
    report: Option<DispatchReport>,
}

impl DispatcherHandle {
    /// Request a stop. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// True once the dispatch thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait at most `timeout` for the loop to end.
    ///
    /// Returns `ReconfigurationTimeout` if it is still running; the handle
    /// stays usable and can be waited on again.
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<DispatchReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        match self.done_rx.recv_timeout(timeout) {
            Ok(report) => Ok(self.complete(report)),
            Err(RecvTimeoutError::Timeout) => Err(PitchscopeError::ReconfigurationTimeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(self.panicked()),
        }
    }

    /// Block until the loop ends.
    pub fn join(&mut self) -> Result<DispatchReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        match self.done_rx.recv() {
            Ok(report) => Ok(self.complete(report)),
            Err(_) => Err(self.panicked()),
        }
    }

    /// Stop, then wait at most `timeout`.
    pub fn stop_and_join(&mut self, timeout: Duration) -> Result<DispatchReport> {
        self.stop();
        self.join_timeout(timeout)
    }

    fn complete(&mut self, report: DispatchReport) -> DispatchReport {
        // The thread has sent its last message, so this join is short.
        if let Some(thread) = self.thread.take()
            && let Err(payload) = thread.join()
        {
            tracing::warn!(
                "dispatch thread panicked after reporting: {}",
                panic_message(payload.as_ref())
            );
        }
        self.report = Some(report.clone());
        report
    }

    fn panicked(&mut self) -> PitchscopeError {
        let message = match self.thread.take().map(JoinHandle::join) {
            Some(Err(payload)) => panic_message(payload.as_ref()),
            _ => "dispatch thread exited without a report".to_string(),
        };
        tracing::error!(source = %self.source_name, "dispatch thread panicked: {}", message);
        PitchscopeError::DispatchPanicked {
            thread: defaults::DISPATCH_THREAD_NAME.to_string(),
            message,
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
