use crate::defaults;
use crate::dispatch::buffer::FrameGeometry;
use crate::dispatch::controller::ControllerConfig;
use crate::error::{PitchscopeError, Result};
use crate::processors::pitch::PitchAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub dispatch: DispatchConfig,
    pub analysis: AnalysisConfig,
    pub playback: PlaybackConfig,
}

/// Where samples come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Capture device name; `None` uses the system default.
    pub device: Option<String>,
    /// Read this WAV file instead of capturing.
    pub file: Option<PathBuf>,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per read from file and tone sources.
    pub chunk_size: usize,
}

/// Frame geometry and lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub buffer_size: usize,
    pub overlap: usize,
    pub stop_timeout_ms: u64,
}

/// Analysis processors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub algorithm: PitchAlgorithm,
    /// Also run the spectrum processor.
    pub spectrum: bool,
}

/// Playback of the analysed stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Play file input on the default output device.
    pub enabled: bool,
    /// Also write the stream to this WAV file.
    pub record_path: Option<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device: None,
            file: None,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_size: defaults::CHUNK_SIZE,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: defaults::BUFFER_SIZE,
            overlap: defaults::OVERLAP,
            stop_timeout_ms: defaults::STOP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            algorithm: PitchAlgorithm::default(),
            spectrum: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns `PitchscopeError::Config` if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(PitchscopeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PITCHSCOPE_DEVICE → input.device
    /// - PITCHSCOPE_FILE → input.file
    /// - PITCHSCOPE_ALGORITHM → analysis.algorithm (ignored with a warning if unknown)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("PITCHSCOPE_DEVICE")
            && !device.is_empty()
        {
            self.input.device = Some(device);
        }

        if let Ok(file) = std::env::var("PITCHSCOPE_FILE")
            && !file.is_empty()
        {
            self.input.file = Some(PathBuf::from(file));
        }

        if let Ok(algorithm) = std::env::var("PITCHSCOPE_ALGORITHM")
            && !algorithm.is_empty()
        {
            match algorithm.parse() {
                Ok(parsed) => self.analysis.algorithm = parsed,
                Err(e) => tracing::warn!("ignoring PITCHSCOPE_ALGORITHM: {}", e),
            }
        }

        self
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.input.sample_rate == 0 {
            return Err(PitchscopeError::ConfigInvalidValue {
                key: "input.sample_rate".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.input.chunk_size == 0 {
            return Err(PitchscopeError::ConfigInvalidValue {
                key: "input.chunk_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.dispatch.stop_timeout_ms == 0 {
            return Err(PitchscopeError::ConfigInvalidValue {
                key: "dispatch.stop_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        self.geometry().map(|_| ())
    }

    /// Frame geometry from `[dispatch]`.
    pub fn geometry(&self) -> Result<FrameGeometry> {
        FrameGeometry::new(self.dispatch.buffer_size, self.dispatch.overlap)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.stop_timeout_ms)
    }

    /// Controller settings, validated.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        self.validate()?;
        Ok(ControllerConfig {
            geometry: self.geometry()?,
            stop_timeout: self.stop_timeout(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/pitchscope/config.toml on Linux, or `None` when the
    /// platform has no config directory.
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pitchscope").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_pitchscope_env() {
        remove_env("PITCHSCOPE_DEVICE");
        remove_env("PITCHSCOPE_FILE");
        remove_env("PITCHSCOPE_ALGORITHM");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.input.device, None);
        assert_eq!(config.input.file, None);
        assert_eq!(config.input.sample_rate, 44_100);
        assert_eq!(config.input.chunk_size, 1024);

        assert_eq!(config.dispatch.buffer_size, 4096);
        assert_eq!(config.dispatch.overlap, 3072);
        assert_eq!(config.dispatch.stop_timeout_ms, 2000);

        assert_eq!(config.analysis.algorithm, PitchAlgorithm::Yin);
        assert!(!config.analysis.spectrum);

        assert!(!config.playback.enabled);
        assert_eq!(config.playback.record_path, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [input]
            device = "hw:0,0"
            file = "/tmp/song.wav"
            sample_rate = 48000
            chunk_size = 512

            [dispatch]
            buffer_size = 2048
            overlap = 1024
            stop_timeout_ms = 500

            [analysis]
            algorithm = "mpm"
            spectrum = true

            [playback]
            enabled = true
            record_path = "/tmp/out.wav"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.input.device, Some("hw:0,0".to_string()));
        assert_eq!(config.input.file, Some(PathBuf::from("/tmp/song.wav")));
        assert_eq!(config.input.sample_rate, 48000);
        assert_eq!(config.input.chunk_size, 512);
        assert_eq!(config.dispatch.buffer_size, 2048);
        assert_eq!(config.dispatch.overlap, 1024);
        assert_eq!(config.stop_timeout(), Duration::from_millis(500));
        assert_eq!(config.analysis.algorithm, PitchAlgorithm::Mpm);
        assert!(config.analysis.spectrum);
        assert!(config.playback.enabled);
        assert_eq!(
            config.playback.record_path,
            Some(PathBuf::from("/tmp/out.wav"))
        );

        let controller = config.controller_config().unwrap();
        assert_eq!(controller.geometry.step(), 1024);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [analysis]
            algorithm = "fft-yin"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.analysis.algorithm, PitchAlgorithm::FftYin);
        assert_eq!(config.input, InputConfig::default());
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let temp_file = write_temp(
            r#"
            [analysis]
            algorithm = "autotune"
        "#,
        );
        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let mut config = Config::default();
        config.dispatch.overlap = config.dispatch.buffer_size;
        assert!(matches!(
            config.validate(),
            Err(PitchscopeError::InvalidGeometry { .. })
        ));
        assert!(config.controller_config().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.input.sample_rate = 0;
        match config.validate() {
            Err(PitchscopeError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "input.sample_rate")
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }

        let mut config = Config::default();
        config.dispatch.stop_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pitchscope_env();

        set_env("PITCHSCOPE_DEVICE", "hw:1,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.input.device, Some("hw:1,0".to_string()));
        assert_eq!(config.input.file, None); // Not overridden

        clear_pitchscope_env();
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pitchscope_env();

        set_env("PITCHSCOPE_DEVICE", "pulse");
        set_env("PITCHSCOPE_FILE", "/tmp/a.wav");
        set_env("PITCHSCOPE_ALGORITHM", "amdf");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.input.device, Some("pulse".to_string()));
        assert_eq!(config.input.file, Some(PathBuf::from("/tmp/a.wav")));
        assert_eq!(config.analysis.algorithm, PitchAlgorithm::Amdf);

        clear_pitchscope_env();
    }

    #[test]
    fn test_env_override_invalid_algorithm_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pitchscope_env();

        set_env("PITCHSCOPE_ALGORITHM", "nonsense");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.analysis.algorithm, PitchAlgorithm::Yin);

        clear_pitchscope_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pitchscope_env();

        set_env("PITCHSCOPE_DEVICE", "");
        let config = Config::default().with_env_overrides();

        // Empty string should not override default
        assert_eq!(config.input.device, None);

        clear_pitchscope_env();
    }

    #[test]
    fn test_invalid_toml_returns_config_error() {
        let temp_file = write_temp(
            r#"
            [input
            device = "broken
        "#,
        );

        match Config::load(temp_file.path()) {
            Err(PitchscopeError::Config(_)) => {}
            other => panic!("Expected PitchscopeError::Config, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_value_type_returns_config_error() {
        let temp_file = write_temp(
            r#"
            [dispatch]
            buffer_size = "large"
        "#,
        );

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(matches!(err, PitchscopeError::Config(_)));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_default_path_ends_with_app_dir() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("pitchscope/config.toml"));
        }
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_pitchscope_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_temp(
            r#"
            [input
            device = "broken
        "#,
        );

        // Invalid TOML is an error, not a silent fallback to defaults
        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(matches!(err, PitchscopeError::Config(_)));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut config = Config::default();
        config.analysis.algorithm = PitchAlgorithm::FftYin;
        config.input.device = Some("pipewire".to_string());
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
