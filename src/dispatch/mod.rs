//! Frame dispatch engine.
//!
//! Source → [`OverlapFrameBuffer`] → [`ProcessorChain`], driven by a
//! [`Dispatcher`] on its own thread and supervised by a [`PipelineController`].

pub mod buffer;
pub mod chain;
pub mod controller;
pub mod dispatcher;
pub mod error;

pub use buffer::{Frame, FrameGeometry, OverlapFrameBuffer};
pub use chain::{Processor, ProcessorAction, ProcessorChain, ProcessorFault};
pub use controller::{ControllerConfig, PipelineController, ProcessorFactory, ProcessorSpec, build_chain};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherHandle, DispatcherState};
pub use error::{CollectingReporter, ErrorReporter, LogReporter};
