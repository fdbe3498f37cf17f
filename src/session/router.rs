//! Channel routing policy.
//!
//! Decides whether a channel message is shown in its own IRC channel or
//! redirected to the overflow channel, and whether the owner may join a
//! channel during membership sync. Names are IRC names (`#town-square`).

use std::sync::Arc;
use tracing::debug;

use super::Engine;
use crate::bridge::{ChannelKind, UserInfo};
use crate::irc::IrcChannel;

/// Per-protocol include/exclude lists.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl RoutingPolicy {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Whether traffic for `name` goes to the overflow channel.
    ///
    /// Exclusion wins over inclusion; an empty include list restricts nothing.
    pub fn redirects(&self, name: &str) -> bool {
        if self.exclude.iter().any(|c| c == name) {
            return true;
        }
        !self.include.is_empty() && !self.include.iter().any(|c| c == name)
    }

    /// Whether the owner may join `name` during membership sync.
    pub fn may_join(&self, name: &str) -> bool {
        if self.include.iter().any(|c| c == name) {
            return true;
        }
        if self.include.is_empty() && !self.exclude.iter().any(|c| c == name) {
            return true;
        }
        self.include.is_empty() || self.exclude.is_empty()
    }
}

/// Where a channel line ends up.
pub struct Route {
    pub channel: Arc<dyn IrcChannel>,
    /// Name of the backend channel when the line was redirected.
    pub redirected_from: Option<String>,
}

impl Route {
    /// Nick to display: redirected channel traffic is suffixed with the
    /// channel it came from.
    pub fn display_nick(&self, nick: &str, kind: ChannelKind) -> String {
        match &self.redirected_from {
            Some(origin) if kind != ChannelKind::Direct => format!("{nick}/{origin}"),
            _ => nick.to_string(),
        }
    }
}

impl Engine {
    /// Resolve the IRC channel for a message from `sender` in `channel_id`,
    /// joining the sender (and for group chats the owner) as needed.
    pub(crate) async fn route(
        &self,
        channel_id: &str,
        kind: ChannelKind,
        sender: &UserInfo,
    ) -> Route {
        let channel = self.channel(channel_id);

        if kind == ChannelKind::Group && !channel.has_user(self.registry.owner()) {
            channel.join(self.registry.owner());
            self.sync_channel(channel_id, &channel.name()).await;
        }

        let ghost = self.registry.resolve(sender);
        if !channel.has_user(&ghost) && !self.registry.is_owner(sender) {
            debug!(nick = %ghost.nick(), channel = %channel.name(), "sender not in channel, joining");
            channel.join(&ghost);
        }

        let name = channel.name();
        if self.policy.redirects(&name) {
            debug!(channel = %name, "channel not joined on IRC, redirecting to overflow");
            return Route {
                channel: self.overflow_channel(),
                redirected_from: Some(name),
            };
        }

        Route {
            channel,
            redirected_from: None,
        }
    }
}
