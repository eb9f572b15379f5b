//! Analysis session entry point.
//!
//! Wires a source selection, the configured processors and the stdout sink
//! into a [`PipelineController`], then reacts to stdin commands until the
//! stream ends, the duration elapses or the user stops it.

use crate::audio::source::SampleSource;
use crate::audio::tone::ToneSource;
use crate::audio::wav::WavSampleSource;
use crate::cli::{RunArgs, SessionCommand};
use crate::config::Config;
use crate::dispatch::controller::{PipelineController, ProcessorSpec};
use crate::dispatch::dispatcher::DispatchReport;
use crate::error::{PitchscopeError, Result};
use crate::processors::pitch::PitchAlgorithm;
use crate::processors::playback::WavWriterSink;
use crate::sink::StdoutSink;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the session loop checks for a finished stream.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Which source the next reconfiguration opens.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSelection {
    /// Capture device; `None` is the system default.
    Device(Option<String>),
    File(PathBuf),
    Tone(f32),
}

/// What the loop should do after a stdin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reconfigure,
    Continue,
    Quit,
}

/// Everything needed to (re)build the pipeline.
#[derive(Debug, Clone)]
pub struct Session {
    config: Config,
    source: SourceSelection,
    sink: StdoutSink,
    play: bool,
}

impl Session {
    /// Merge CLI arguments over the loaded configuration.
    pub fn from_args(mut config: Config, args: &RunArgs) -> Result<Self> {
        if let Some(algorithm) = args.algorithm {
            config.analysis.algorithm = algorithm;
        }
        if let Some(buffer_size) = args.buffer_size {
            config.dispatch.buffer_size = buffer_size;
        }
        if let Some(overlap) = args.overlap {
            config.dispatch.overlap = overlap;
        }
        if args.spectrum {
            config.analysis.spectrum = true;
        }
        if args.play {
            config.playback.enabled = true;
        }
        if let Some(path) = &args.record {
            config.playback.record_path = Some(path.clone());
        }
        config.validate()?;

        let source = if let Some(hz) = args.tone {
            SourceSelection::Tone(hz)
        } else if let Some(path) = args.file.clone().or_else(|| config.input.file.clone()) {
            SourceSelection::File(path)
        } else {
            SourceSelection::Device(args.device.clone().or_else(|| config.input.device.clone()))
        };

        let sink = if args.json {
            StdoutSink::json()
        } else {
            StdoutSink::text()
        }
        .with_unpitched(args.show_unpitched);
        let play = config.playback.enabled;

        Ok(Self {
            config,
            source,
            sink,
            play,
        })
    }

    pub fn source(&self) -> &SourceSelection {
        &self.source
    }

    pub fn algorithm(&self) -> PitchAlgorithm {
        self.config.analysis.algorithm
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Construct a fresh, unopened source for the current selection.
    pub fn build_source(&self) -> Result<Box<dyn SampleSource>> {
        match &self.source {
            SourceSelection::File(path) => Ok(Box::new(
                WavSampleSource::from_path(path).with_chunk_size(self.config.input.chunk_size),
            )),
            SourceSelection::Tone(hz) => Ok(Box::new(
                ToneSource::new(*hz)
                    .with_sample_rate(self.config.input.sample_rate)
                    .with_chunk_size(self.config.input.chunk_size)
                    .realtime(),
            )),
            SourceSelection::Device(name) => build_capture(name.as_deref(), &self.config),
        }
    }

    /// Processor specs for the current settings, in dispatch order.
    ///
    /// Output processors come first so audio leaves before analysis runs on
    /// the same frame.
    pub fn build_specs(&self) -> Result<Vec<ProcessorSpec>> {
        let mut specs = Vec::new();
        if self.play {
            if matches!(self.source, SourceSelection::Device(_)) {
                tracing::warn!("playback of live capture is disabled to avoid feedback");
            } else {
                specs.push(build_speaker()?);
            }
        }
        if let Some(path) = &self.config.playback.record_path {
            specs.push(ProcessorSpec::playback(Box::new(WavWriterSink::new(path))));
        }

        let sink = Arc::new(self.sink);
        specs.push(ProcessorSpec::pitch(
            self.config.analysis.algorithm,
            sink.clone(),
        ));
        if self.config.analysis.spectrum {
            specs.push(ProcessorSpec::spectrum(sink));
        }
        Ok(specs)
    }

    /// Apply a stdin command to the selection.
    fn apply(&mut self, command: SessionCommand) -> Step {
        match command {
            SessionCommand::Algorithm(algorithm) => {
                self.config.analysis.algorithm = algorithm;
                Step::Reconfigure
            }
            SessionCommand::Device(name) => {
                self.source = SourceSelection::Device(name);
                Step::Reconfigure
            }
            SessionCommand::File(path) => {
                self.source = SourceSelection::File(path);
                Step::Reconfigure
            }
            SessionCommand::Tone(hz) => {
                self.source = SourceSelection::Tone(hz);
                Step::Reconfigure
            }
            SessionCommand::Status | SessionCommand::Help => Step::Continue,
            SessionCommand::Stop => Step::Quit,
        }
    }
}

#[cfg(feature = "cpal-audio")]
fn build_capture(device: Option<&str>, config: &Config) -> Result<Box<dyn SampleSource>> {
    use crate::audio::capture::CpalSampleSource;
    Ok(Box::new(
        CpalSampleSource::new(device).with_sample_rate(config.input.sample_rate),
    ))
}

#[cfg(not(feature = "cpal-audio"))]
fn build_capture(device: Option<&str>, _config: &Config) -> Result<Box<dyn SampleSource>> {
    Err(PitchscopeError::AudioDeviceNotFound {
        device: format!(
            "{} (built without the cpal-audio feature)",
            device.unwrap_or("default")
        ),
    })
}

#[cfg(feature = "cpal-audio")]
fn build_speaker() -> Result<ProcessorSpec> {
    use crate::audio::playback::CpalPlayback;
    Ok(ProcessorSpec::playback(Box::new(CpalPlayback::new(None))))
}

#[cfg(not(feature = "cpal-audio"))]
fn build_speaker() -> Result<ProcessorSpec> {
    Err(PitchscopeError::Playback {
        message: "built without the cpal-audio feature".to_string(),
    })
}

/// Run the `run` command: analyse the selected source until it ends.
///
/// # Arguments
/// * `config` - Base configuration (overridden by CLI args)
/// * `args` - Parsed `run` arguments
/// * `quiet` - Suppress status messages on stderr
pub fn run_analysis(config: Config, args: &RunArgs, quiet: bool) -> Result<()> {
    let mut session = Session::from_args(config, args)?;
    let mut controller = PipelineController::new(session.config().controller_config()?);

    let commands = if args.no_interactive {
        crossbeam_channel::never()
    } else {
        spawn_stdin_reader()?
    };

    start(&mut controller, &session)?;
    if !quiet {
        eprintln!(
            "Analysing {} with {}. {}",
            describe(session.source()),
            session.algorithm(),
            if args.no_interactive {
                "Ctrl+C to stop."
            } else {
                SessionCommand::HELP
            }
        );
    }

    let deadline = args.duration.map(|d| Instant::now() + d);
    let mut commands = commands;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("duration elapsed");
            break;
        }
        if controller.state().is_some() && !controller.is_running() {
            let report = controller.wait()?;
            if let Some(report) = report {
                summarize(&report, quiet);
            }
            break;
        }

        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                let command = match line.parse::<SessionCommand>() {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{} ({})", e, SessionCommand::HELP);
                        continue;
                    }
                };
                match command {
                    SessionCommand::Help => eprintln!("{}", SessionCommand::HELP),
                    SessionCommand::Status => eprintln!(
                        "{} with {} ({:?})",
                        controller.active_source().unwrap_or("nothing"),
                        session.algorithm(),
                        controller.state()
                    ),
                    _ => {}
                }
                match session.apply(command) {
                    Step::Reconfigure => {
                        // On failure the controller is idle or still on the old source.
                        if let Err(e) = start(&mut controller, &session) {
                            if e.is_retryable() {
                                eprintln!("Reconfiguration failed, try again: {}", e);
                            } else {
                                eprintln!("Reconfiguration failed: {}", e);
                            }
                        } else if !quiet {
                            eprintln!(
                                "Now analysing {} with {}",
                                describe(session.source()),
                                session.algorithm()
                            );
                        }
                    }
                    Step::Continue => {}
                    Step::Quit => break,
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // stdin closed; keep running on the stream alone
                commands = crossbeam_channel::never();
            }
        }
    }

    if let Some(report) = controller.stop()? {
        summarize(&report, quiet);
    }
    Ok(())
}

fn start(controller: &mut PipelineController, session: &Session) -> Result<()> {
    let source = session.build_source()?;
    let specs = session.build_specs()?;
    controller.reconfigure(source, specs)
}

fn describe(source: &SourceSelection) -> String {
    match source {
        SourceSelection::Device(Some(name)) => format!("device '{}'", name),
        SourceSelection::Device(None) => "the default input device".to_string(),
        SourceSelection::File(path) => format!("'{}'", path.display()),
        SourceSelection::Tone(hz) => format!("a {} Hz tone", hz),
    }
}

fn summarize(report: &DispatchReport, quiet: bool) {
    tracing::info!(
        source = %report.source,
        state = ?report.state,
        frames = report.frames,
        samples = report.samples,
        faults = report.faults.len(),
        "dispatch finished"
    );
    if quiet {
        return;
    }
    eprintln!(
        "{}: {} frames, {} samples",
        report.source, report.frames, report.samples
    );
    for fault in &report.faults {
        eprintln!("  processor '{}' failed at frame {}: {}", fault.processor, fault.frame, fault.message);
    }
    if let Some(error) = &report.read_error {
        eprintln!("  source read failed: {}", error);
    }
}

/// Forward stdin lines to the session loop from a background thread.
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| PitchscopeError::Other(format!("failed to spawn stdin reader: {}", e)))?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs::default()
    }

    #[test]
    fn cli_args_override_config() {
        let mut config = Config::default();
        config.input.file = Some(PathBuf::from("from-config.wav"));
        let run = RunArgs {
            algorithm: Some(PitchAlgorithm::Amdf),
            buffer_size: Some(1024),
            overlap: Some(512),
            spectrum: true,
            ..args()
        };
        let session = Session::from_args(config, &run).unwrap();
        assert_eq!(session.algorithm(), PitchAlgorithm::Amdf);
        assert_eq!(session.config().dispatch.buffer_size, 1024);
        assert_eq!(session.config().dispatch.overlap, 512);
        assert_eq!(
            session.source(),
            &SourceSelection::File(PathBuf::from("from-config.wav"))
        );
    }

    #[test]
    fn tone_wins_over_configured_file() {
        let mut config = Config::default();
        config.input.file = Some(PathBuf::from("from-config.wav"));
        let run = RunArgs {
            tone: Some(440.0),
            ..args()
        };
        let session = Session::from_args(config, &run).unwrap();
        assert_eq!(session.source(), &SourceSelection::Tone(440.0));
    }

    #[test]
    fn default_source_is_default_device() {
        let session = Session::from_args(Config::default(), &args()).unwrap();
        assert_eq!(session.source(), &SourceSelection::Device(None));
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let run = RunArgs {
            buffer_size: Some(512),
            overlap: Some(512),
            ..args()
        };
        assert!(matches!(
            Session::from_args(Config::default(), &run),
            Err(PitchscopeError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn spec_list_follows_settings() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunArgs {
            tone: Some(330.0),
            spectrum: true,
            record: Some(dir.path().join("out.wav")),
            ..args()
        };
        let session = Session::from_args(Config::default(), &run).unwrap();
        let specs = session.build_specs().unwrap();
        assert_eq!(specs.len(), 3);
        assert!(matches!(specs[0], ProcessorSpec::Playback { .. }));
        assert!(matches!(specs[1], ProcessorSpec::Pitch { .. }));
        assert!(matches!(specs[2], ProcessorSpec::Spectrum { .. }));
    }

    #[test]
    fn show_unpitched_reaches_stdout_sink() {
        let run = RunArgs {
            tone: Some(440.0),
            show_unpitched: true,
            ..args()
        };
        let session = Session::from_args(Config::default(), &run).unwrap();
        assert_eq!(session.sink, StdoutSink::text().with_unpitched(true));

        let quiet = Session::from_args(Config::default(), &args()).unwrap();
        assert_eq!(quiet.sink, StdoutSink::text());
    }

    #[test]
    fn commands_update_selection() {
        let mut session = Session::from_args(Config::default(), &args()).unwrap();
        assert_eq!(
            session.apply(SessionCommand::Algorithm(PitchAlgorithm::Mpm)),
            Step::Reconfigure
        );
        assert_eq!(session.algorithm(), PitchAlgorithm::Mpm);
        assert_eq!(session.apply(SessionCommand::Tone(110.0)), Step::Reconfigure);
        assert_eq!(session.source(), &SourceSelection::Tone(110.0));
        assert_eq!(session.apply(SessionCommand::Status), Step::Continue);
        assert_eq!(session.apply(SessionCommand::Stop), Step::Quit);
    }

    #[test]
    fn tone_session_runs_through_controller() {
        let run = RunArgs {
            tone: Some(440.0),
            buffer_size: Some(1024),
            overlap: Some(512),
            ..args()
        };
        let session = Session::from_args(Config::default(), &run).unwrap();
        let mut controller =
            PipelineController::new(session.config().controller_config().unwrap());
        start(&mut controller, &session).unwrap();
        assert_eq!(controller.active_source(), Some("tone:440Hz"));
        let report = controller.stop().unwrap().unwrap();
        assert_eq!(report.source, "tone:440Hz");
        assert!(report.faults.is_empty());
    }

    #[test]
    fn describe_names_source() {
        assert_eq!(describe(&SourceSelection::Tone(440.0)), "a 440 Hz tone");
        assert_eq!(
            describe(&SourceSelection::Device(None)),
            "the default input device"
        );
    }
}
