//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default API base URL (can be overridden at compile time via SYNC_DEFAULT_API_BASE_URL).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("SYNC_DEFAULT_API_BASE_URL") {
    Some(url) => url,
    None => "http://localhost:5000/api",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_API_BASE_URL: &str = "SYNC_API_BASE_URL";
const ENV_LOG_LEVEL: &str = "SYNC_LOG_LEVEL";

/// Main configuration.
///
/// Only `api_base_url` shapes behavior against the backend; the timing
/// fields tune the settle delays and polling cadence of the sync core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL every transport path is joined onto.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request deadline enforced by the HTTP transport.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Delay between observing an authenticated session and the first feed attach.
    #[serde(default = "default_subscription_settle_delay_ms")]
    pub subscription_settle_delay_ms: u64,
    /// Delay between a mutation notification and the follow-up dashboard refresh.
    #[serde(default = "default_mutation_settle_delay_ms")]
    pub mutation_settle_delay_ms: u64,
    /// Background dashboard polling period.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Re-fetch period of the HTTP polling feed transport.
    #[serde(default = "default_feed_poll_interval_ms")]
    pub feed_poll_interval_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_subscription_settle_delay_ms() -> u64 {
    100
}

fn default_mutation_settle_delay_ms() -> u64 {
    500
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_feed_poll_interval_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            subscription_settle_delay_ms: default_subscription_settle_delay_ms(),
            mutation_settle_delay_ms: default_mutation_settle_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            feed_poll_interval_ms: default_feed_poll_interval_ms(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let wrap = |source: Box<dyn std::error::Error + Send + Sync>| CoreError::ConfigFile {
            path: path.to_path_buf(),
            source,
        };
        let content = std::fs::read_to_string(path).map_err(|e| wrap(e.into()))?;
        serde_json::from_str(&content).map_err(|e| wrap(e.into()))
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from environment-style lookups.
    ///
    /// Only the base URL and the log level can be overridden; blank values
    /// are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = non_empty(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    /// Reject settings the sync core cannot operate with.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_base_url()?;
        if self.request_timeout_ms == 0 {
            return Err(CoreError::must_be_positive("request_timeout_ms"));
        }
        if self.poll_interval_secs == 0 {
            return Err(CoreError::must_be_positive("poll_interval_secs"));
        }
        if self.mutation_settle_delay_ms == 0 {
            return Err(CoreError::must_be_positive("mutation_settle_delay_ms"));
        }
        if self.feed_poll_interval_ms == 0 {
            return Err(CoreError::must_be_positive("feed_poll_interval_ms"));
        }
        Ok(())
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn subscription_settle_delay(&self) -> Duration {
        Duration::from_millis(self.subscription_settle_delay_ms)
    }

    pub fn mutation_settle_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.subscription_settle_delay(), Duration::from_millis(100));
        assert_eq!(config.mutation_settle_delay(), Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "poll_interval_secs": 10 }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.mutation_settle_delay_ms, 500);
    }

    #[test]
    fn test_malformed_config_file_names_the_path() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), "{ not json").unwrap();

        match Config::load(&paths) {
            Err(CoreError::ConfigFile { path, .. }) => assert_eq!(path, paths.config_file()),
            other => panic!("expected config file error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.api_base_url = "https://api.example.com/v1".to_string();
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.api_base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        assert!(!paths.config_file().exists());
        let config = Config::load(&paths).unwrap();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.subscription_settle_delay_ms, 100);
    }

    #[test]
    fn test_env_overrides_apply_only_known_keys() {
        let env: HashMap<&str, &str> = [
            ("SYNC_API_BASE_URL", "https://staging.example.com/api"),
            ("SYNC_LOG_LEVEL", "trace"),
            ("SYNC_POLL_INTERVAL_SECS", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://staging.example.com/api");
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn test_blank_env_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_base_url = "not a valid url".to_string();

        assert!(config.api_base_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::default();
        config.poll_interval_secs = 0;

        match config.validate() {
            Err(CoreError::InvalidSetting { field, .. }) => assert_eq!(field, "poll_interval_secs"),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let mut config = Config::default();
        config.request_timeout_ms = 0;

        match config.validate() {
            Err(CoreError::InvalidSetting { field, .. }) => assert_eq!(field, "request_timeout_ms"),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
