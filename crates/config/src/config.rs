//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
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

/// Where finished clips and scratch files go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Destination folder for converted clips
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// Scratch directory for two-pass log files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_destination() -> PathBuf {
    PathBuf::from(".")
}

fn default_work_dir() -> PathBuf {
    env::temp_dir().join("webber")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            work_dir: default_work_dir(),
        }
    }
}

/// External encoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Encoder executable (default "ffmpeg")
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// Prober executable (default "ffprobe")
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    /// Liveness poll interval of the supervisor in milliseconds (default 500)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Longest wait for the frame-rate probe in milliseconds (default 10000)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Audio bitrate reserved out of the target size in kbps (default 320)
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    /// Video bitrate below which the user is asked to confirm (default 512)
    #[serde(default = "default_low_bitrate_warning_kbps")]
    pub low_bitrate_warning_kbps: u32,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_audio_bitrate_kbps() -> u32 {
    320
}

fn default_low_bitrate_warning_kbps() -> u32 {
    512
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            poll_interval_ms: default_poll_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            low_bitrate_warning_kbps: default_low_bitrate_warning_kbps(),
        }
    }
}

/// User-defined encoding profile
///
/// A profile with the same name as a built-in one replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProfileConfig {
    /// Container file extension without the dot
    pub extension: String,
    /// Muxer name passed to `-f`
    pub format: String,
    /// Arguments applied to every pass
    #[serde(default)]
    pub all: Vec<String>,
    /// Arguments applied to the analysis pass only
    #[serde(default)]
    pub first: Vec<String>,
    /// Arguments applied to the output pass only
    #[serde(default)]
    pub second: Vec<String>,
}

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusConfig {
    /// Address for the status server, e.g. "127.0.0.1:7878". Disabled when unset.
    #[serde(default)]
    pub bind: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
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
    /// - WEBBER_DESTINATION -> paths.destination
    /// - WEBBER_WORK_DIR -> paths.work_dir
    /// - WEBBER_FFMPEG -> encoder.ffmpeg
    /// - WEBBER_FFPROBE -> encoder.ffprobe
    /// - WEBBER_POLL_INTERVAL_MS -> encoder.poll_interval_ms
    /// - WEBBER_STATUS_BIND -> status.bind
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("WEBBER_DESTINATION") {
            if !val.trim().is_empty() {
                self.paths.destination = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("WEBBER_WORK_DIR") {
            if !val.trim().is_empty() {
                self.paths.work_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("WEBBER_FFMPEG") {
            if !val.trim().is_empty() {
                self.encoder.ffmpeg = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("WEBBER_FFPROBE") {
            if !val.trim().is_empty() {
                self.encoder.ffprobe = PathBuf::from(val);
            }
        }

        // Zero would turn the liveness poll into a busy loop
        if let Ok(val) = env::var("WEBBER_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                if ms > 0 {
                    self.encoder.poll_interval_ms = ms;
                }
            }
        }

        if let Ok(val) = env::var("WEBBER_STATUS_BIND") {
            self.status.bind = if val.trim().is_empty() {
                None
            } else {
                Some(val)
            };
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("WEBBER_DESTINATION");
        env::remove_var("WEBBER_WORK_DIR");
        env::remove_var("WEBBER_FFMPEG");
        env::remove_var("WEBBER_FFPROBE");
        env::remove_var("WEBBER_POLL_INTERVAL_MS");
        env::remove_var("WEBBER_STATUS_BIND");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            destination in "[a-z][a-z0-9_/]{0,20}",
            poll in 1u64..10_000,
            audio in 0u32..1024,
            low in 1u32..4096,
            bind in proptest::option::of("127\\.0\\.0\\.1:[1-9][0-9]{3}"),
        ) {
            let toml_str = format!(
                r#"
[paths]
destination = "{}"

[encoder]
poll_interval_ms = {}
audio_bitrate_kbps = {}
low_bitrate_warning_kbps = {}

[status]
{}
"#,
                destination,
                poll,
                audio,
                low,
                bind.as_ref().map(|b| format!("bind = \"{}\"", b)).unwrap_or_default()
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.paths.destination, PathBuf::from(&destination));
            prop_assert_eq!(config.encoder.poll_interval_ms, poll);
            prop_assert_eq!(config.encoder.audio_bitrate_kbps, audio);
            prop_assert_eq!(config.encoder.low_bitrate_warning_kbps, low);
            prop_assert_eq!(config.status.bind, bind);
        }

        #[test]
        fn prop_env_overrides_poll_interval(
            initial in 1u64..5_000,
            override_ms in 1u64..5_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[encoder]\npoll_interval_ms = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("WEBBER_POLL_INTERVAL_MS", override_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.poll_interval_ms, override_ms);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.paths.destination, PathBuf::from("."));
        assert_eq!(config.encoder.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.ffprobe, PathBuf::from("ffprobe"));
        assert_eq!(config.encoder.poll_interval_ms, 500);
        assert_eq!(config.encoder.probe_timeout_ms, 10_000);
        assert_eq!(config.encoder.audio_bitrate_kbps, 320);
        assert_eq!(config.encoder.low_bitrate_warning_kbps, 512);
        assert!(config.status.bind.is_none());
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_profiles_section() {
        let toml_str = r#"
[profiles.h264]
extension = "mp4"
format = "mp4"
all = ["-c:v", "libx264", "-preset", "slow"]
second = ["-movflags", "+faststart"]
"#;
        let config = Config::parse_toml(toml_str).expect("Profiles should parse");
        let profile = config.profiles.get("h264").expect("h264 profile");

        assert_eq!(profile.extension, "mp4");
        assert_eq!(profile.format, "mp4");
        assert_eq!(profile.all, vec!["-c:v", "libx264", "-preset", "slow"]);
        assert!(profile.first.is_empty());
        assert_eq!(profile.second, vec!["-movflags", "+faststart"]);
    }

    #[test]
    fn test_zero_poll_interval_override_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("WEBBER_POLL_INTERVAL_MS", "0");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.poll_interval_ms, 500);
    }

    #[test]
    fn test_env_overrides_paths_and_tools() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("WEBBER_DESTINATION", "/clips");
        env::set_var("WEBBER_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");
        env::set_var("WEBBER_STATUS_BIND", "127.0.0.1:9000");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.paths.destination, PathBuf::from("/clips"));
        assert_eq!(config.encoder.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.status.bind.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/webber/config.toml")
            .expect("Missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }
}
