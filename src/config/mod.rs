//! Configuration management.
//!
//! flowsync configuration can come from:
//! - Config file (~/.config/flowsync/config.toml)
//! - Environment variables (FLOWSYNC_*), which win over the file
//! - Command-line flags, applied by the binary on top of both

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ReconnectPolicy;
use crate::error::{Error, Result};

/// flowsync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Workflow backend REST API
    #[serde(default)]
    pub backend: BackendConfig,

    /// Push channel
    #[serde(default)]
    pub push: PushConfig,

    /// Fallback poller
    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend REST API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API root, e.g. `http://localhost:8000/api`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Push channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// Origin the push URL is derived from (`https` origins use `wss`)
    #[serde(default = "default_origin")]
    pub origin: String,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Backoff base (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl PushConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_origin() -> String {
    "http://localhost:8000".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    crate::client::ws_client::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

/// Fallback poller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

fn default_interval_ms() -> u64 {
    crate::poller::DEFAULT_POLL_INTERVAL_MS
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "flowsync=info".to_string()
}

impl Config {
    /// Load configuration from the default location plus environment overrides.
    ///
    /// A missing or unreadable default file is ignored.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load an explicit config file plus environment overrides.
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let partial: PartialConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::default();
        config.apply_partial(partial);
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowsync"))
            .unwrap_or_else(|| PathBuf::from(".flowsync"))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLOWSYNC_API_URL") {
            self.backend.api_base_url = url;
        }
        if let Some(timeout) = lookup("FLOWSYNC_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.backend.timeout_seconds = parsed;
            }
        }
        if let Some(origin) = lookup("FLOWSYNC_ORIGIN") {
            self.push.origin = origin;
        }
        if let Some(attempts) = lookup("FLOWSYNC_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse::<u32>() {
                self.push.max_reconnect_attempts = parsed;
            }
        }
        if let Some(interval) = lookup("FLOWSYNC_POLL_INTERVAL_MS") {
            if let Ok(parsed) = interval.parse::<u64>() {
                self.poller.interval_ms = parsed;
            }
        }
        if let Some(filter) = lookup("FLOWSYNC_LOG") {
            self.logging.default_filter = filter;
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(backend) = partial.backend {
            self.backend = backend;
        }
        if let Some(push) = partial.push {
            self.push = push;
        }
        if let Some(poller) = partial.poller {
            self.poller = poller;
        }
        if let Some(logging) = partial.logging {
            self.logging = logging;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    backend: Option<BackendConfig>,
    push: Option<PushConfig>,
    poller: Option<PollerConfig>,
    logging: Option<LoggingConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend.api_base_url, "http://localhost:8000/api");
        assert_eq!(config.poller.interval(), Duration::from_millis(2000));
        assert_eq!(config.push.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.logging.default_filter, "flowsync=info");
    }

    #[test]
    fn test_partial_file_keeps_other_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[push]\norigin = \"https://flows.example.com\"\n\n[poller]\ninterval_ms = 500"
        )
        .unwrap();

        let partial = Config::load_partial_from_path(file.path()).unwrap();
        let mut config = Config::default();
        config.apply_partial(partial);

        assert_eq!(config.push.origin, "https://flows.example.com");
        assert_eq!(config.push.max_reconnect_attempts, 5);
        assert_eq!(config.poller.interval_ms, 500);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_load_from_path_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poller\ninterval_ms = ").unwrap();

        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLOWSYNC_API_URL", "http://api:9000/api"),
            ("FLOWSYNC_POLL_INTERVAL_MS", "750"),
            ("FLOWSYNC_MAX_RECONNECT_ATTEMPTS", "not-a-number"),
        ]
        .into();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.api_base_url, "http://api:9000/api");
        assert_eq!(config.poller.interval_ms, 750);
        assert_eq!(config.push.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
