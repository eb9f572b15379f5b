//! Command-line interface for pitchscope
//!
//! Provides argument parsing using clap derive macros, plus the line
//! commands accepted on stdin while `run` is active.

use crate::processors::pitch::PitchAlgorithm;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Live pitch and spectrum analysis of overlapping audio frames
#[derive(Parser, Debug)]
#[command(
    name = "pitchscope",
    version,
    about = "Live pitch and spectrum analysis of overlapping audio frames"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status messages (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info logs, -vv: debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyse a live device, a WAV file or a synthetic tone
    Run(RunArgs),

    /// List available audio input devices
    Devices,

    /// List pitch detection algorithms
    Algorithms,
}

/// Options for `run`
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Read samples from a WAV file
    #[arg(long, value_name = "PATH", conflicts_with_all = ["device", "tone"])]
    pub file: Option<PathBuf>,

    /// Capture from this input device (e.g., hw:0)
    #[arg(long, value_name = "DEVICE", conflicts_with = "tone")]
    pub device: Option<String>,

    /// Analyse a synthetic sine tone at this frequency
    #[arg(long, value_name = "HZ")]
    pub tone: Option<f32>,

    /// Pitch detection algorithm (yin, fft-yin, mpm, amdf)
    #[arg(long, short = 'a', value_name = "NAME")]
    pub algorithm: Option<PitchAlgorithm>,

    /// Samples per analysis frame
    #[arg(long, value_name = "SAMPLES")]
    pub buffer_size: Option<usize>,

    /// Samples shared between consecutive frames
    #[arg(long, value_name = "SAMPLES")]
    pub overlap: Option<usize>,

    /// Stop after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Play the analysed stream on the default output device (file and tone
    /// input only). Playback runs first in the chain, ahead of analysis
    #[arg(long)]
    pub play: bool,

    /// Also write the analysed stream to a WAV file
    #[arg(long, value_name = "PATH")]
    pub record: Option<PathBuf>,

    /// Print the spectrum peak of every frame
    #[arg(long)]
    pub spectrum: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Also print frames where no pitch was found
    #[arg(long)]
    pub show_unpitched: bool,

    /// Ignore commands on stdin
    #[arg(long)]
    pub no_interactive: bool,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("invalid duration '{}'", s));
        }
        return Ok(Duration::from_secs_f64(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// A line typed on stdin while `run` is active.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Switch the pitch algorithm, keeping the source kind.
    Algorithm(PitchAlgorithm),
    /// Switch to a capture device (`default` for the system default).
    Device(Option<String>),
    /// Switch to a WAV file.
    File(PathBuf),
    /// Switch to a synthetic tone.
    Tone(f32),
    /// Print the active source and algorithm.
    Status,
    Stop,
    Help,
}

impl SessionCommand {
    pub const HELP: &'static str = "commands: algo NAME | device [NAME] | file PATH | tone HZ | status | stop | help";
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "algo" | "algorithm" => rest
                .parse()
                .map(SessionCommand::Algorithm)
                .map_err(|e: crate::error::PitchscopeError| e.to_string()),
            "device" | "mic" => {
                if rest.is_empty() || rest.eq_ignore_ascii_case("default") {
                    Ok(SessionCommand::Device(None))
                } else {
                    Ok(SessionCommand::Device(Some(rest.to_string())))
                }
            }
            "file" | "open" => {
                if rest.is_empty() {
                    Err("file needs a path".to_string())
                } else {
                    Ok(SessionCommand::File(PathBuf::from(rest)))
                }
            }
            "tone" => match rest.parse::<f32>() {
                Ok(hz) if hz.is_finite() && hz > 0.0 => Ok(SessionCommand::Tone(hz)),
                _ => Err(format!("invalid tone frequency '{}'", rest)),
            },
            "status" => Ok(SessionCommand::Status),
            "stop" | "quit" | "exit" | "q" => Ok(SessionCommand::Stop),
            "help" | "?" => Ok(SessionCommand::Help),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["pitchscope", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(args.file.is_none());
                assert!(args.device.is_none());
                assert!(args.tone.is_none());
                assert!(args.algorithm.is_none());
                assert!(args.duration.is_none());
                assert!(!args.play);
                assert!(!args.spectrum);
                assert!(!args.json);
            }
            other => panic!("Expected Run command, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["pitchscope"]).is_err());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["pitchscope", "-vv", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Devices));
    }

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "pitchscope",
            "run",
            "--file",
            "song.wav",
            "--algorithm",
            "mpm",
            "--buffer-size",
            "2048",
            "--overlap",
            "1024",
            "--duration",
            "1m30s",
            "--record",
            "out.wav",
            "--spectrum",
            "--json",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.file, Some(PathBuf::from("song.wav")));
        assert_eq!(args.algorithm, Some(PitchAlgorithm::Mpm));
        assert_eq!(args.buffer_size, Some(2048));
        assert_eq!(args.overlap, Some(1024));
        assert_eq!(args.duration, Some(Duration::from_secs(90)));
        assert_eq!(args.record, Some(PathBuf::from("out.wav")));
        assert!(args.spectrum);
        assert!(args.json);
        assert!(!args.show_unpitched);
    }

    #[test]
    fn test_parse_show_unpitched() {
        let cli =
            Cli::try_parse_from(["pitchscope", "run", "--tone", "440", "--show-unpitched"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert!(args.show_unpitched);
    }

    #[test]
    fn test_file_and_tone_conflict() {
        assert!(
            Cli::try_parse_from(["pitchscope", "run", "--file", "a.wav", "--tone", "440"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["pitchscope", "run", "--device", "hw:0", "--tone", "440"])
                .is_err()
        );
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        assert!(Cli::try_parse_from(["pitchscope", "run", "--algorithm", "autotune"]).is_err());
    }

    #[test]
    fn test_parse_global_config() {
        let cli =
            Cli::try_parse_from(["pitchscope", "algorithms", "--config", "/path/to/config.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.toml")));
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1.5"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration(" 2m30s "), Ok(Duration::from_secs(150)));
        assert!(parse_duration("-3").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(
            "algo amdf".parse(),
            Ok(SessionCommand::Algorithm(PitchAlgorithm::Amdf))
        );
        assert_eq!("device".parse(), Ok(SessionCommand::Device(None)));
        assert_eq!("device default".parse(), Ok(SessionCommand::Device(None)));
        assert_eq!(
            "device USB Audio".parse(),
            Ok(SessionCommand::Device(Some("USB Audio".to_string())))
        );
        assert_eq!(
            "file /tmp/my song.wav".parse(),
            Ok(SessionCommand::File(PathBuf::from("/tmp/my song.wav")))
        );
        assert_eq!("tone 220".parse(), Ok(SessionCommand::Tone(220.0)));
        assert_eq!("  STOP  ".parse(), Ok(SessionCommand::Stop));
        assert_eq!("status".parse(), Ok(SessionCommand::Status));
    }

    #[test]
    fn test_session_command_errors() {
        assert!("".parse::<SessionCommand>().is_err());
        assert!("file".parse::<SessionCommand>().is_err());
        assert!("tone -5".parse::<SessionCommand>().is_err());
        assert!("tone abc".parse::<SessionCommand>().is_err());
        assert!("algo nope".parse::<SessionCommand>().is_err());
        assert!("dance".parse::<SessionCommand>().is_err());
    }
}
