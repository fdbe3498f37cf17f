//! Per-backend configuration.
//!
//! Keys keep the flat lowercase spelling operators already use in existing
//! bridge configs (`joininclude`, `prefixmainteam`, ...).

use serde::Deserialize;
use std::time::Duration;

use super::defaults::*;

/// Configuration for one backend protocol (`[mattermost]`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// IRC channel names the owner is allowed to see directly. Empty means
    /// no restriction.
    #[serde(default, rename = "joininclude")]
    pub join_include: Vec<String>,
    /// IRC channel names whose traffic goes to the overflow channel.
    #[serde(default, rename = "joinexclude")]
    pub join_exclude: Vec<String>,
    /// Prefix channels of the primary team with the team name as well.
    #[serde(default, rename = "prefixmainteam")]
    pub prefix_main_team: bool,
    /// Never mark channels as viewed on the backend.
    #[serde(default, rename = "disableautoview")]
    pub disable_auto_view: bool,
    /// Use the backend nickname instead of the username when it is a valid
    /// IRC nick.
    #[serde(default, rename = "prefernickname")]
    pub prefer_nickname: bool,
    /// Drop the parent text from thread reply annotations.
    #[serde(default, rename = "hidereplies")]
    pub hide_replies: bool,
    /// Backend servers users may log in to. Empty allows any.
    #[serde(default)]
    pub restrict: Vec<String>,
    /// Channel names kept "viewed" to hold the owner's presence active.
    #[serde(default = "default_anti_idle_channels", rename = "antiidle")]
    pub anti_idle: Vec<String>,
    #[serde(default = "default_anti_idle_interval_secs", rename = "antiidle_interval_secs")]
    pub anti_idle_interval_secs: u64,
    /// Minimum spacing between two channel-list refreshes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl ProtocolConfig {
    /// Whether `server` may be used as a login target.
    pub fn is_valid_server(&self, server: &str) -> bool {
        self.restrict.is_empty() || self.restrict.iter().any(|s| s == server)
    }

    pub fn anti_idle_interval(&self) -> Duration {
        Duration::from_secs(self.anti_idle_interval_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            join_include: Vec::new(),
            join_exclude: Vec::new(),
            prefix_main_team: false,
            disable_auto_view: false,
            prefer_nickname: false,
            hide_replies: false,
            restrict: Vec::new(),
            anti_idle: default_anti_idle_channels(),
            anti_idle_interval_secs: default_anti_idle_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_restrict_allows_any_server() {
        let config = ProtocolConfig::default();
        assert!(config.is_valid_server("chat.example.com"));
        assert!(config.is_valid_server(""));
    }

    #[test]
    fn restrict_only_allows_listed_servers() {
        let config = ProtocolConfig {
            restrict: vec!["chat.example.com".into()],
            ..Default::default()
        };
        assert!(config.is_valid_server("chat.example.com"));
        assert!(!config.is_valid_server("chat.evil.example"));
    }

    #[test]
    fn anti_idle_defaults_to_town_square() {
        let config = ProtocolConfig::default();
        assert_eq!(config.anti_idle, vec!["town-square"]);
        assert_eq!(config.anti_idle_interval(), Duration::from_secs(60));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = ProtocolConfig {
            anti_idle_interval_secs: 0,
            refresh_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.anti_idle_interval(), Duration::from_secs(1));
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
    }
}
