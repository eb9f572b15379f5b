//! Ordered processor chain with per-processor fault isolation.

use crate::dispatch::buffer::Frame;
use crate::error::{PitchscopeError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// What a processor wants after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessorAction {
    /// Keep receiving frames.
    #[default]
    Continue,
    /// Remove me from the chain now; `processing_finished` follows immediately.
    Unregister,
}

/// A consumer of frames.
///
/// Processors run synchronously on the dispatch thread. There is no
/// per-callback timeout: a slow processor delays every later processor and
/// the next read from the source.
pub trait Processor: Send {
    /// Name used in fault reports and logs.
    fn name(&self) -> &str;

    /// Handle the first frame of a stream.
    fn process_full(&mut self, frame: &Frame) -> Result<ProcessorAction>;

    /// Handle every later frame. The first `overlap` samples repeat the
    /// previous frame's tail.
    fn process_overlapping(&mut self, frame: &Frame) -> Result<ProcessorAction> {
        self.process_full(frame)
    }

    /// Called once when the stream ends, the dispatcher stops, or the
    /// processor unregisters itself.
    fn processing_finished(&mut self) {}
}

/// A processor that failed and was removed from its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorFault {
    pub processor: String,
    pub frame: u64,
    pub message: String,
    /// The processor panicked rather than returning an error.
    pub panicked: bool,
}

impl From<ProcessorFault> for PitchscopeError {
    fn from(fault: ProcessorFault) -> Self {
        PitchscopeError::ProcessorFault {
            processor: fault.processor,
            frame: fault.frame,
            message: fault.message,
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
        .to_string()
}

/// Processors in registration order.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
    finished: bool,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor. The same processor type may be registered twice;
    /// each registration is invoked.
    pub fn register(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Names of the processors still registered, in invocation order.
    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Deliver `frame` to every processor in registration order.
    ///
    /// `first` selects `process_full` over `process_overlapping`. Processors
    /// that fail are removed and returned as faults; the rest of the chain
    /// still sees the frame.
    pub fn dispatch(&mut self, frame: &Frame, first: bool) -> Vec<ProcessorFault> {
        let mut faults = Vec::new();
        if self.finished {
            return faults;
        }

        let mut i = 0;
        while i < self.processors.len() {
            let processor = &mut self.processors[i];
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if first {
                    processor.process_full(frame)
                } else {
                    processor.process_overlapping(frame)
                }
            }));

            let (message, panicked) = match outcome {
                Ok(Ok(ProcessorAction::Continue)) => {
                    i += 1;
                    continue;
                }
                Ok(Ok(ProcessorAction::Unregister)) => {
                    let mut removed = self.processors.remove(i);
                    tracing::debug!(processor = removed.name(), "processor unregistered");
                    finish_isolated(removed.as_mut());
                    continue;
                }
                Ok(Err(e)) => (e.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };

            let removed = self.processors.remove(i);
            faults.push(ProcessorFault {
                processor: removed.name().to_string(),
                frame: frame.index,
                message,
                panicked,
            });
        }
        faults
    }

    /// Call `processing_finished` on every processor, in order. Runs once;
    /// later calls do nothing.
    pub fn notify_end_of_stream(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for processor in &mut self.processors {
            finish_isolated(processor.as_mut());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn finish_isolated(processor: &mut dyn Processor) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| processor.processing_finished()));
    if let Err(payload) = result {
        tracing::warn!(
            processor = processor.name(),
            "processing_finished panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}
