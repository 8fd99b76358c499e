//! Bridge configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level configuration for a host embedding the Bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Bridge runtime settings
    pub bridge: BridgeConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .modbridge.yml
        let local_config = PathBuf::from(".modbridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/modbridge/modbridge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("modbridge").join("modbridge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => {
                let local = PathBuf::from(".modbridge.yml");
                if local.exists() {
                    local
                } else {
                    dirs::config_dir()?.join("modbridge").join("modbridge.yml")
                }
            }
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Bridge runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default deadline for `use_service` in milliseconds
    #[serde(rename = "use-timeout-ms")]
    pub use_timeout_ms: u64,

    /// Default deadline for `wait_for` and `request` in milliseconds
    #[serde(rename = "wait-timeout-ms")]
    pub wait_timeout_ms: u64,

    /// Channel that receives a payload for every failed callback
    #[serde(rename = "diagnostics-channel")]
    pub diagnostics_channel: String,

    /// Channels created with replay at construction
    pub channels: BTreeMap<String, ChannelOptions>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            use_timeout_ms: 5000,
            wait_timeout_ms: 5000,
            diagnostics_channel: "bridge:diagnostics".to_string(),
            channels: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Get the default `use_service` timeout as a Duration
    pub fn use_timeout(&self) -> Duration {
        debug!(use_timeout_ms = %self.use_timeout_ms, "BridgeConfig::use_timeout: called");
        Duration::from_millis(self.use_timeout_ms)
    }

    /// Get the default `wait_for` timeout as a Duration
    pub fn wait_timeout(&self) -> Duration {
        debug!(wait_timeout_ms = %self.wait_timeout_ms, "BridgeConfig::wait_timeout: called");
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Replay settings for a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Number of messages kept for late subscribers (0 disables replay)
    pub replay: usize,

    /// Age after which buffered messages are no longer replayed
    #[serde(rename = "ttl-ms", skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl ChannelOptions {
    /// Replay the last `count` messages
    pub fn replay(count: usize) -> Self {
        Self {
            replay: count,
            ttl_ms: None,
        }
    }

    /// Also expire buffered messages older than `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.log_level.is_none());
        assert_eq!(config.bridge.use_timeout_ms, 5000);
        assert_eq!(config.bridge.wait_timeout_ms, 5000);
        assert_eq!(config.bridge.diagnostics_channel, "bridge:diagnostics");
        assert!(config.bridge.channels.is_empty());
    }

    #[test]
    fn test_timeout_durations() {
        let config = BridgeConfig {
            use_timeout_ms: 250,
            wait_timeout_ms: 1500,
            ..Default::default()
        };
        assert_eq!(config.use_timeout(), Duration::from_millis(250));
        assert_eq!(config.wait_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug
bridge:
  use-timeout-ms: 1000
  wait-timeout-ms: 2000
  diagnostics-channel: "diag"
  channels:
    chat:
      replay: 2
    telemetry:
      replay: 10
      ttl-ms: 30000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.bridge.use_timeout_ms, 1000);
        assert_eq!(config.bridge.diagnostics_channel, "diag");
        assert_eq!(config.bridge.channels["chat"], ChannelOptions::replay(2));
        assert_eq!(
            config.bridge.channels["telemetry"].ttl(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
bridge:
  use-timeout-ms: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bridge.use_timeout_ms, 10);
        assert_eq!(config.bridge.wait_timeout_ms, 5000);
        assert_eq!(config.bridge.diagnostics_channel, "bridge:diagnostics");
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: warn\nbridge:\n  wait-timeout-ms: 42").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bridge.wait_timeout_ms, 42);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_channel_options_ttl() {
        let opts = ChannelOptions::replay(3).with_ttl(Duration::from_millis(1500));
        assert_eq!(opts.replay, 3);
        assert_eq!(opts.ttl(), Some(Duration::from_millis(1500)));
        assert_eq!(ChannelOptions::default().ttl(), None);
    }
}
