//! Core configuration types and loading.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;
use super::protocol::ProtocolConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bridge configuration.
///
/// Backend sections are keyed by protocol name, so a `[mattermost]` table
/// configures the adapter whose `protocol()` is `"mattermost"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// IRC-side channel names and queue sizes.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Login backfill tuning.
    #[serde(default)]
    pub backfill: BackfillConfig,
    /// Per-protocol sections.
    #[serde(flatten)]
    pub protocols: HashMap<String, ProtocolConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for one backend protocol, falling back to defaults when
    /// the section is absent.
    pub fn protocol(&self, name: &str) -> ProtocolConfig {
        self.protocols.get(name).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backfill.workers == 0 {
            return Err(ConfigError::Invalid("backfill.workers must be at least 1".into()));
        }
        if self.backfill.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "backfill.queue_depth must be at least 1".into(),
            ));
        }
        if self.bridge.event_queue == 0 {
            return Err(ConfigError::Invalid("bridge.event_queue must be at least 1".into()));
        }
        for (name, channel) in [
            ("users_channel", &self.bridge.users_channel),
            ("overflow_channel", &self.bridge.overflow_channel),
        ] {
            if !channel.starts_with('&') && !channel.starts_with('#') {
                return Err(ConfigError::Invalid(format!(
                    "bridge.{name} must be a channel name, got {channel:?}"
                )));
            }
        }
        Ok(())
    }
}

/// IRC-side naming and queueing.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Channel holding every known backend user.
    #[serde(default = "default_users_channel")]
    pub users_channel: String,
    /// Channel receiving traffic from excluded or unjoined channels.
    #[serde(default = "default_overflow_channel")]
    pub overflow_channel: String,
    /// Nick that announces history replay.
    #[serde(default = "default_service_nick")]
    pub service_nick: String,
    /// Capacity of the adapter -> dispatcher event channel.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            users_channel: default_users_channel(),
            overflow_channel: default_overflow_channel(),
            service_nick: default_service_nick(),
            event_queue: default_event_queue(),
        }
    }
}

/// Login backfill worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_backfill_workers")]
    pub workers: usize,
    /// Depth of the channel work queue.
    #[serde(default = "default_backfill_queue_depth")]
    pub queue_depth: usize,
    /// Minimum spacing between two channel dequeues across the pool.
    #[serde(default = "default_backfill_throttle_ms")]
    pub throttle_ms: u64,
}

impl BackfillConfig {
    /// Throttle period, at least one millisecond.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms.max(1))
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            workers: default_backfill_workers(),
            queue_depth: default_backfill_queue_depth(),
            throttle_ms: default_backfill_throttle_ms(),
        }
    }
}
