//! Configuration file parser for `{data_dir}/config.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged as warnings. `BASE_URL` and
//! `TUBECAST_API_TOKEN` in the environment override the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::registry::{
    ChannelDefaults, DOWNLOAD_DELAY_RANGE, MAX_EPISODES_RANGE, REFRESH_INTERVAL_RANGE,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for the database and the `podcasts/` media tree.
    pub data_dir: PathBuf,

    /// Public URL prefix used in feed enclosures.
    pub base_url: String,

    /// HTTP listen address.
    pub listen: String,

    /// Seconds between scheduler ticks.
    pub tick_seconds: u64,

    /// Refresh interval for channels that do not set one.
    pub default_refresh_interval_hours: u32,

    /// Episode cap for channels that do not set one.
    pub default_max_episodes: u32,

    /// Delay gate for channels that do not set one.
    pub default_download_delay_hours: u32,

    /// Pause between consecutive downloads within a run.
    pub download_pause_seconds: u64,

    /// Entries kept in the run log.
    pub log_capacity: usize,

    /// Path or name of the yt-dlp executable.
    pub ytdlp_path: String,

    /// Upper bound for a single yt-dlp invocation.
    pub adapter_timeout_minutes: u64,

    /// Bearer token required by mutating API routes. Unset = open API.
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("appdata"),
            base_url: "http://localhost:5000".to_string(),
            listen: "0.0.0.0:5000".to_string(),
            tick_seconds: 60,
            default_refresh_interval_hours: 24,
            default_max_episodes: 10,
            default_download_delay_hours: 6,
            download_pause_seconds: 20,
            log_capacity: 500,
            ytdlp_path: "yt-dlp".to_string(),
            adapter_timeout_minutes: 60,
            api_token: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("base_url", &self.base_url)
            .field("listen", &self.listen)
            .field("tick_seconds", &self.tick_seconds)
            .field(
                "default_refresh_interval_hours",
                &self.default_refresh_interval_hours,
            )
            .field("default_max_episodes", &self.default_max_episodes)
            .field(
                "default_download_delay_hours",
                &self.default_download_delay_hours,
            )
            .field("download_pause_seconds", &self.download_pause_seconds)
            .field("log_capacity", &self.log_capacity)
            .field("ytdlp_path", &self.ytdlp_path)
            .field("adapter_timeout_minutes", &self.adapter_timeout_minutes)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

const KNOWN_KEYS: [&str; 12] = [
    "data_dir",
    "base_url",
    "listen",
    "tick_seconds",
    "default_refresh_interval_hours",
    "default_max_episodes",
    "default_download_delay_hours",
    "download_pause_seconds",
    "log_capacity",
    "ytdlp_path",
    "adapter_timeout_minutes",
    "api_token",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), data_dir = %config.data_dir.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var("BASE_URL").ok(),
            std::env::var("TUBECAST_API_TOKEN").ok(),
        )
    }

    fn with_overrides(
        mut self,
        base_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(token) = api_token.filter(|t| !t.is_empty()) {
            self.api_token = Some(token);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.public_base_url()?;
        if self.tick_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "tick_seconds",
                reason: "must be at least 1".into(),
            });
        }
        check_range(
            "default_max_episodes",
            self.default_max_episodes,
            MAX_EPISODES_RANGE,
        )?;
        check_range(
            "default_download_delay_hours",
            self.default_download_delay_hours,
            DOWNLOAD_DELAY_RANGE,
        )?;
        check_range(
            "default_refresh_interval_hours",
            self.default_refresh_interval_hours,
            REFRESH_INTERVAL_RANGE,
        )?;
        Ok(())
    }

    /// `base_url` parsed. Only http(s) URLs that can carry a path are accepted.
    pub fn public_base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            key: "base_url",
            reason,
        };
        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(invalid(format!("{} is not an http(s) URL", self.base_url)));
        }
        Ok(url)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tubecast.db")
    }

    pub fn media_root(&self) -> PathBuf {
        self.data_dir.join("podcasts")
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn download_pause(&self) -> Duration {
        Duration::from_secs(self.download_pause_seconds)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_minutes.saturating_mul(60))
    }

    pub fn api_secret(&self) -> Option<SecretString> {
        self.api_token.clone().map(SecretString::from)
    }

    pub fn channel_defaults(&self) -> ChannelDefaults {
        ChannelDefaults {
            max_episodes: self.default_max_episodes,
            download_delay_hours: self.default_download_delay_hours,
            refresh_interval_hours: self.default_refresh_interval_hours,
        }
    }
}

/// Channel defaults obey the same bounds as values submitted through the API.
fn check_range(key: &'static str, value: u32, range: RangeInclusive<i64>) -> Result<(), ConfigError> {
    if range.contains(&i64::from(value)) {
        return Ok(());
    }
    Err(ConfigError::Invalid {
        key,
        reason: format!(
            "must be between {} and {}, got {value}",
            range.start(),
            range.end()
        ),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("appdata"));
        assert_eq!(config.base_url, "http://localhost:5000");
        assert_eq!(config.tick_seconds, 60);
        assert_eq!(config.default_refresh_interval_hours, 24);
        assert_eq!(config.download_pause_seconds, 20);
        assert!(config.api_token.is_none());
        assert_eq!(config.database_path(), PathBuf::from("appdata/tubecast.db"));
        assert_eq!(config.media_root(), PathBuf::from("appdata/podcasts"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.listen, "0.0.0.0:5000");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tick_seconds, 60);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("tick_seconds = 5\nlog_capacity = 20\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tick_seconds, 5);
        assert_eq!(config.log_capacity, 20);
        assert_eq!(config.ytdlp_path, "yt-dlp");
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
data_dir = "/srv/tubecast"
base_url = "https://pods.example.com/tube/"
listen = "127.0.0.1:8080"
tick_seconds = 30
default_refresh_interval_hours = 12
default_max_episodes = 5
default_download_delay_hours = 2
download_pause_seconds = 0
log_capacity = 100
ytdlp_path = "/usr/local/bin/yt-dlp"
adapter_timeout_minutes = 15
api_token = "s3cret"
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/tubecast"));
        assert_eq!(
            config.public_base_url().unwrap().as_str(),
            "https://pods.example.com/tube/"
        );
        assert_eq!(config.adapter_timeout(), Duration::from_secs(900));
        assert_eq!(config.download_pause(), Duration::ZERO);
        let defaults = config.channel_defaults();
        assert_eq!(defaults.max_episodes, 5);
        assert_eq!(defaults.download_delay_hours, 2);
        assert_eq!(defaults.refresh_interval_hours, 12);
        assert!(config.api_secret().is_some());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("tick_seconds = \"often\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("tick_seconds = 9\ntheme = \"dark\"\n");
        assert_eq!(Config::load(&path).unwrap().tick_seconds, 9);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let (_dir, path) = write_config("base_url = \"ftp://files.example.com\"\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Invalid { key: "base_url", .. })
        ));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let (_dir, path) = write_config("tick_seconds = 0\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Invalid {
                key: "tick_seconds",
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_range_channel_defaults_rejected() {
        for (content, key) in [
            ("default_max_episodes = 0\n", "default_max_episodes"),
            ("default_max_episodes = 1001\n", "default_max_episodes"),
            ("default_refresh_interval_hours = 0\n", "default_refresh_interval_hours"),
            ("default_download_delay_hours = 4000000000\n", "default_download_delay_hours"),
        ] {
            let (_dir, path) = write_config(content);
            match Config::load(&path) {
                Err(ConfigError::Invalid { key: rejected, .. }) => assert_eq!(rejected, key),
                other => panic!("expected {key} to be rejected, got {other:?}"),
            }
        }

        let (_dir, path) = write_config(
            "default_max_episodes = 1000\ndefault_download_delay_hours = 720\ndefault_refresh_interval_hours = 8760\n",
        );
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"#".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let config = Config::default()
            .with_overrides(
                Some("https://public.example.org".into()),
                Some("env-token".into()),
            )
            .unwrap();
        assert_eq!(config.base_url, "https://public.example.org");
        assert_eq!(config.api_token.as_deref(), Some("env-token"));

        let untouched = Config::default()
            .with_overrides(Some("  ".into()), Some(String::new()))
            .unwrap();
        assert_eq!(untouched.base_url, "http://localhost:5000");
        assert!(untouched.api_token.is_none());
    }

    #[test]
    fn test_bad_override_rejected() {
        assert!(Config::default()
            .with_overrides(Some("not a url".into()), None)
            .is_err());
    }

    #[test]
    fn test_debug_masks_api_token() {
        let config = Config {
            api_token: Some("super-secret-token".into()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
