//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value is out of range or a required value is missing
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Encoder settings passed to ffmpeg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Constant rate factor used when no explicit bitrate is requested (0-51)
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// x264/x265 speed preset
    #[serde(default = "default_preset")]
    pub preset: String,
    /// ffmpeg video encoder name
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
    /// Sources taller than this are scaled down (0 disables downscaling)
    #[serde(default = "default_max_height")]
    pub max_height: Option<u32>,
    /// Seconds to wait for the encoder to quit after a graceful stop request
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
}

fn default_crf() -> u8 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_max_height() -> Option<u32> {
    Some(1080)
}

fn default_terminate_grace_secs() -> u64 {
    10
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            crf: default_crf(),
            preset: default_preset(),
            video_codec: default_video_codec(),
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            max_height: default_max_height(),
            terminate_grace_secs: default_terminate_grace_secs(),
        }
    }
}

/// Progress observation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressConfig {
    /// Interval between progress channel polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Directory holding per-job progress files (OS temp dir if None)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            scratch_dir: None,
        }
    }
}

impl ProgressConfig {
    /// Directory where progress channel files are created
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// How input and output roots are made available locally
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Roots are plain local directories
    #[default]
    Local,
    /// Roots are CIFS shares mounted into temporary directories
    Cifs,
}

/// Input/output location pair for one catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LibraryLocation {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Storage provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub series: LibraryLocation,
    #[serde(default)]
    pub movies: LibraryLocation,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CRF -> encoder.crf
    /// - PRESET -> encoder.preset
    /// - SMB_USERNAME / SMB_PASSWORD -> storage credentials
    /// - SMB_INPUT_SERIES / SMB_OUTPUT_SERIES -> storage.series
    /// - SMB_INPUT_MOVIES / SMB_OUTPUT_MOVIES -> storage.movies
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CRF") {
            if let Ok(crf) = val.trim().parse::<u8>() {
                self.encoder.crf = crf;
            }
        }

        if let Ok(val) = env::var("PRESET") {
            let val = val.trim();
            if !val.is_empty() {
                self.encoder.preset = val.to_string();
            }
        }

        override_string(&mut self.storage.username, "SMB_USERNAME");
        override_string(&mut self.storage.password, "SMB_PASSWORD");
        override_string(&mut self.storage.series.input, "SMB_INPUT_SERIES");
        override_string(&mut self.storage.series.output, "SMB_OUTPUT_SERIES");
        override_string(&mut self.storage.movies.input, "SMB_INPUT_MOVIES");
        override_string(&mut self.storage.movies.output, "SMB_OUTPUT_MOVIES");
    }

    /// Check value ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoder.crf > 51 {
            return Err(ConfigError::Invalid(format!(
                "encoder.crf must be between 0 and 51, got {}",
                self.encoder.crf
            )));
        }
        if self.encoder.preset.trim().is_empty() {
            return Err(ConfigError::Invalid("encoder.preset must not be empty".to_string()));
        }
        if self.progress.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "progress.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Cifs
            && (self.storage.username.is_none() || self.storage.password.is_none())
        {
            return Err(ConfigError::Invalid(
                "cifs storage requires username and password".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file (defaults if absent), apply environment overrides
    /// and validate the result
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn override_string(slot: &mut Option<String>, var: &str) {
    if let Ok(val) = env::var(var) {
        if !val.is_empty() {
            *slot = Some(val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests must not interleave
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for var in [
            "CRF",
            "PRESET",
            "SMB_USERNAME",
            "SMB_PASSWORD",
            "SMB_INPUT_SERIES",
            "SMB_OUTPUT_SERIES",
            "SMB_INPUT_MOVIES",
            "SMB_OUTPUT_MOVIES",
        ] {
            env::remove_var(var);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            crf in 0u8..=51,
            preset in "[a-z]{3,10}",
            max_height in proptest::option::of(240u32..4320),
            poll in 1u64..10_000,
            grace in 0u64..120,
        ) {
            let toml_str = format!(
                r#"
[encoder]
crf = {}
preset = "{}"
{}
terminate_grace_secs = {}

[progress]
poll_interval_ms = {}

[storage]
backend = "cifs"
username = "user"
password = "secret"

[storage.series]
input = "//nas/series"
output = "//nas/series-small"
"#,
                crf,
                preset,
                max_height.map(|h| format!("max_height = {}", h)).unwrap_or_default(),
                grace,
                poll,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.encoder.crf, crf);
            prop_assert_eq!(&config.encoder.preset, &preset);
            // an absent key falls back to the default ceiling
            prop_assert_eq!(config.encoder.max_height, max_height.or(Some(1080)));
            prop_assert_eq!(config.encoder.terminate_grace_secs, grace);
            prop_assert_eq!(config.progress.poll_interval_ms, poll);
            prop_assert_eq!(config.storage.backend, StorageBackend::Cifs);
            prop_assert_eq!(config.storage.series.input.as_deref(), Some("//nas/series"));
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_env_overrides_crf(
            initial in 0u8..=51,
            override_crf in 0u8..=51,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(&format!("[encoder]\ncrf = {}\n", initial))
                .expect("Valid TOML");

            env::set_var("CRF", override_crf.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.crf, override_crf);
        }
    }

    #[test]
    fn test_env_overrides_storage_locations() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SMB_USERNAME", "alice");
        env::set_var("SMB_PASSWORD", "hunter2");
        env::set_var("SMB_INPUT_MOVIES", "//nas/movies");
        env::set_var("SMB_OUTPUT_MOVIES", "//nas/movies-x264");
        env::set_var("PRESET", "slow");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.storage.username.as_deref(), Some("alice"));
        assert_eq!(config.storage.password.as_deref(), Some("hunter2"));
        assert_eq!(config.storage.movies.input.as_deref(), Some("//nas/movies"));
        assert_eq!(config.storage.movies.output.as_deref(), Some("//nas/movies-x264"));
        assert_eq!(config.storage.series.input, None);
        assert_eq!(config.encoder.preset, "slow");
    }

    #[test]
    fn test_unparsable_crf_override_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("CRF", "very-small");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.crf, 23);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.encoder.crf, 23);
        assert_eq!(config.encoder.preset, "medium");
        assert_eq!(config.encoder.video_codec, "libx264");
        assert_eq!(config.encoder.max_height, Some(1080));
        assert_eq!(config.encoder.terminate_grace_secs, 10);
        assert_eq!(config.progress.poll_interval_ms, 1000);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_crf() {
        let config = Config::parse_toml("[encoder]\ncrf = 60\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_cifs_without_credentials() {
        let config = Config::parse_toml("[storage]\nbackend = \"cifs\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("username and password"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load("/definitely/not/here/media-squeeze.toml").unwrap();
        assert_eq!(config, Config::default());
    }
}
