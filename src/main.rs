use anyhow::Result;
use clap::Parser;
use pitchscope::app::run_analysis;
use pitchscope::cli::{Cli, Commands};
use pitchscope::config::Config;
use pitchscope::error::PitchscopeError;
use pitchscope::processors::pitch::PitchAlgorithm;
use pitchscope::version_string;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::info!(version = %version_string(), "pitchscope starting");

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_analysis(config, &args, cli.quiet)?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Algorithms => {
            for algorithm in PitchAlgorithm::ALL {
                println!("  {:<8} {}", algorithm.as_str(), algorithm.description());
            }
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over the `-v` count.
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match (quiet, verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "pitchscope=info",
            (false, _) => "pitchscope=debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .ok();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/pitchscope/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        if !path.exists() {
            return Err(PitchscopeError::ConfigFileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        Config::load(path)?
    } else {
        match Config::default_path() {
            Some(default_path) => Config::load_or_default(&default_path)?,
            None => Config::default(),
        }
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = pitchscope::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("pitchscope was built without the cpal-audio feature")
}
