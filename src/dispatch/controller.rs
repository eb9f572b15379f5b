//! Pipeline lifecycle: at most one dispatcher per controller, replaced
//! through [`PipelineController::reconfigure`].

use crate::audio::source::{SampleSource, StreamInfo};
use crate::defaults;
use crate::dispatch::buffer::FrameGeometry;
use crate::dispatch::chain::{Processor, ProcessorChain};
use crate::dispatch::dispatcher::{
    DispatchReport, Dispatcher, DispatcherHandle, DispatcherState, open_source,
};
use crate::dispatch::error::{ErrorReporter, LogReporter};
use crate::error::{PitchscopeError, Result};
use crate::processors::pitch::{PitchAlgorithm, PitchHint, PitchProcessor};
use crate::processors::playback::{PlaybackProcessor, PlaybackSink};
use crate::processors::spectrum::SpectrumProcessor;
use crate::sink::{PitchSink, SpectrumSink};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds a custom processor once the stream format is known.
pub type ProcessorFactory =
    Box<dyn FnOnce(&StreamInfo, FrameGeometry) -> Result<Box<dyn Processor>> + Send>;

/// Description of one processor to build for a new chain.
///
/// Chains are rebuilt on every reconfiguration, so specs describe processors
/// rather than hold them.
pub enum ProcessorSpec {
    Pitch {
        algorithm: PitchAlgorithm,
        sink: Arc<dyn PitchSink>,
    },
    Spectrum {
        sink: Arc<dyn SpectrumSink>,
    },
    Playback {
        sink: Box<dyn PlaybackSink>,
    },
    Custom(ProcessorFactory),
}

impl ProcessorSpec {
    pub fn pitch(algorithm: PitchAlgorithm, sink: Arc<dyn PitchSink>) -> Self {
        ProcessorSpec::Pitch { algorithm, sink }
    }

    pub fn spectrum(sink: Arc<dyn SpectrumSink>) -> Self {
        ProcessorSpec::Spectrum { sink }
    }

    pub fn playback(sink: Box<dyn PlaybackSink>) -> Self {
        ProcessorSpec::Playback { sink }
    }

    pub fn custom<F>(factory: F) -> Self
    where
        F: FnOnce(&StreamInfo, FrameGeometry) -> Result<Box<dyn Processor>> + Send + 'static,
    {
        ProcessorSpec::Custom(Box::new(factory))
    }

    fn build(
        self,
        info: &StreamInfo,
        geometry: FrameGeometry,
        hint: &PitchHint,
    ) -> Result<Box<dyn Processor>> {
        let buffer_size = geometry.buffer_size();
        Ok(match self {
            ProcessorSpec::Pitch { algorithm, sink } => Box::new(
                PitchProcessor::new(algorithm, info, buffer_size, sink).with_hint(hint.clone()),
            ),
            ProcessorSpec::Spectrum { sink } => Box::new(SpectrumProcessor::new(
                info,
                buffer_size,
                hint.clone(),
                sink,
            )),
            ProcessorSpec::Playback { sink } => {
                Box::new(PlaybackProcessor::new(sink, info.format)?)
            }
            ProcessorSpec::Custom(factory) => factory(info, geometry)?,
        })
    }
}

impl fmt::Debug for ProcessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorSpec::Pitch { algorithm, sink } => f
                .debug_struct("Pitch")
                .field("algorithm", algorithm)
                .field("sink", &sink.name())
                .finish(),
            ProcessorSpec::Spectrum { sink } => f
                .debug_struct("Spectrum")
                .field("sink", &sink.name())
                .finish(),
            ProcessorSpec::Playback { sink } => f
                .debug_struct("Playback")
                .field("sink", &sink.name())
                .finish(),
            ProcessorSpec::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Build a chain in spec order. One pitch hint is shared by the whole chain.
pub fn build_chain(
    specs: Vec<ProcessorSpec>,
    info: &StreamInfo,
    geometry: FrameGeometry,
) -> Result<ProcessorChain> {
    let hint = PitchHint::new();
    let mut chain = ProcessorChain::new();
    for spec in specs {
        chain.register(spec.build(info, geometry, &hint)?);
    }
    Ok(chain)
}

/// Configuration for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub geometry: FrameGeometry,
    /// Longest wait for a dispatcher to stop before giving up.
    pub stop_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            geometry: FrameGeometry::default(),
            stop_timeout: defaults::STOP_TIMEOUT,
        }
    }
}

/// Owns the active dispatcher and swaps it on request.
///
/// The previous dispatcher's thread has exited, and its source is closed,
/// before a new source is opened. Dropping the controller stops the active
/// dispatcher.
pub struct PipelineController {
    config: ControllerConfig,
    reporter: Arc<dyn ErrorReporter>,
    active: Option<DispatcherHandle>,
    last_report: Option<DispatchReport>,
    generation: u64,
}

impl PipelineController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(LogReporter),
            active: None,
            last_report: None,
            generation: 0,
        }
    }

    /// Sets a custom error reporter for future dispatchers.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    /// Replace the running pipeline with `source` feeding a chain built from `specs`.
    ///
    /// On `ReconfigurationTimeout` the old dispatcher stays active and nothing
    /// new is opened. On `SourceUnavailable` or a chain build error the
    /// controller is left idle.
    pub fn reconfigure(
        &mut self,
        mut source: Box<dyn SampleSource>,
        specs: Vec<ProcessorSpec>,
    ) -> Result<()> {
        let source_name = source.name();
        tracing::info!(source = %source_name, processors = specs.len(), "reconfiguring pipeline");

        self.retire_active()?;

        let info = open_source(source.as_mut())?;
        let chain = match build_chain(specs, &info, self.config.geometry) {
            Ok(chain) => chain,
            Err(e) => {
                source.close();
                tracing::warn!(source = %source_name, "processor chain build failed: {}", e);
                return Err(e);
            }
        };

        let dispatcher = Dispatcher::from_opened(
            source,
            info,
            self.config.geometry,
            chain,
            Arc::clone(&self.reporter),
        );
        self.active = Some(dispatcher.spawn()?);
        self.generation += 1;
        Ok(())
    }

    /// Stop the active dispatcher and wait for it, at most `stop_timeout`.
    ///
    /// Returns the run's report, or `None` if nothing was running.
    pub fn stop(&mut self) -> Result<Option<DispatchReport>> {
        if self.active.is_none() {
            return Ok(None);
        }
        self.retire_active()?;
        Ok(self.last_report.clone())
    }

    /// Block until the active dispatcher ends on its own (finite sources).
    pub fn wait(&mut self) -> Result<Option<DispatchReport>> {
        let Some(handle) = self.active.as_mut() else {
            return Ok(None);
        };
        let outcome = handle.join();
        self.active = None;
        let report = outcome?;
        self.last_report = Some(report.clone());
        Ok(Some(report))
    }

    /// True while a dispatcher thread is alive.
    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// State of the active dispatcher, if any.
    pub fn state(&self) -> Option<DispatcherState> {
        self.active.as_ref().map(DispatcherHandle::state)
    }

    /// Name of the active dispatcher's source.
    pub fn active_source(&self) -> Option<&str> {
        self.active.as_ref().map(DispatcherHandle::source_name)
    }

    /// Report of the most recently ended dispatcher.
    pub fn last_report(&self) -> Option<&DispatchReport> {
        self.last_report.as_ref()
    }

    /// Number of dispatchers started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn retire_active(&mut self) -> Result<()> {
        let Some(handle) = self.active.as_mut() else {
            return Ok(());
        };
        match handle.stop_and_join(self.config.stop_timeout) {
            Ok(report) => {
                tracing::debug!(source = %report.source, state = ?report.state, "previous dispatcher retired");
                self.last_report = Some(report);
                self.active = None;
                Ok(())
            }
            Err(e @ PitchscopeError::ReconfigurationTimeout { .. }) => {
                tracing::warn!(source = %handle.source_name(), "{}", e);
                Err(e)
            }
            Err(e) => {
                // The thread is gone; its source was closed while unwinding.
                tracing::error!("previous dispatcher ended abnormally: {}", e);
                self.active = None;
                Ok(())
            }
        }
    }
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if let Err(e) = self.retire_active() {
            tracing::warn!("controller dropped with a dispatcher still running: {}", e);
        }
    }
}
