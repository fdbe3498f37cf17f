//! IRC-side ports.
//!
//! The session engine drives the virtual IRC server through [`IrcServer`] and
//! [`IrcChannel`]. The wire encoding behind them is not this crate's concern;
//! [`virtual_server`] is an in-memory implementation that records what the
//! client would see.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bridge::UserInfo;

pub mod virtual_server;

pub use virtual_server::{Outbound, VirtualChannel, VirtualServer};

/// RPL_UNAWAY: the owner is no longer away.
pub const RPL_UNAWAY: u16 = 305;
/// RPL_NOWAWAY: the owner has been marked away.
pub const RPL_NOWAWAY: u16 = 306;

/// Shared handle to a ghost.
pub type GhostRef = Arc<Ghost>;

/// IRC-visible stand-in for a backend user.
///
/// The id is fixed for the ghost's lifetime; the profile snapshot (and with it
/// the nick) is replaced when the backend reports a profile update.
#[derive(Debug)]
pub struct Ghost {
    id: String,
    profile: RwLock<UserInfo>,
}

impl Ghost {
    pub(crate) fn new(id: impl Into<String>, info: UserInfo) -> Self {
        Self {
            id: id.into(),
            profile: RwLock::new(info),
        }
    }

    /// Backend user id (or a synthetic id for the owner and services).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nick(&self) -> String {
        self.profile.read().nick.clone()
    }

    pub fn host(&self) -> String {
        self.profile.read().host.clone()
    }

    pub fn is_me(&self) -> bool {
        self.profile.read().me
    }

    /// Copy of the current profile snapshot.
    pub fn info(&self) -> UserInfo {
        self.profile.read().clone()
    }

    /// `nick!nick@host`
    pub fn prefix(&self) -> String {
        let profile = self.profile.read();
        format!("{}!{}@{}", profile.nick, profile.nick, profile.host)
    }

    pub(crate) fn replace(&self, info: UserInfo) {
        *self.profile.write() = info;
    }
}

/// Channel primitives of the virtual IRC server.
pub trait IrcChannel: Send + Sync {
    /// Backend channel id (or the channel name for bridge-local channels).
    fn id(&self) -> String;
    /// IRC name, e.g. `#town-square`.
    fn name(&self) -> String;
    fn join(&self, ghost: &GhostRef);
    fn batch_join(&self, ghosts: &[GhostRef]);
    fn part(&self, ghost: &GhostRef, reason: &str);
    fn has_user(&self, ghost: &Ghost) -> bool;
    fn members(&self) -> Vec<GhostRef>;
    fn topic(&self) -> String;
    /// Set the topic; `None` attributes it to the server.
    fn set_topic(&self, by: Option<&GhostRef>, text: &str);
    fn spoof_message(&self, nick: &str, text: &str);
    fn spoof_notice(&self, nick: &str, text: &str);
}

/// Server primitives of the virtual IRC server.
pub trait IrcServer: Send + Sync {
    /// Channel keyed by backend id, created under `name` on first use.
    fn channel(&self, id: &str, name: &str) -> Arc<dyn IrcChannel>;
    fn add(&self, ghost: GhostRef);
    fn batch_add(&self, ghosts: &[GhostRef]);
    fn lookup_by_id(&self, id: &str) -> Option<GhostRef>;
    fn lookup_by_nick(&self, nick: &str) -> Option<GhostRef>;
    /// Announce a nick change and re-index the ghost. Call before the
    /// ghost's profile is updated.
    fn rename(&self, ghost: &GhostRef, new_nick: &str);
    /// Send a numeric reply to the connected client.
    fn encode_numeric(&self, code: u16, params: &[&str], trailing: &str);
    /// Private message from `sender` to `target`, one line per text line.
    fn spoof_private(&self, sender: &Ghost, target: &str, text: &str);
    /// Remove the owner from every channel.
    fn logout(&self, owner: &GhostRef);
}

/// Lowercase a nick using RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1459_case_mapping() {
        assert_eq!(irc_to_lower("Alice"), "alice");
        assert_eq!(irc_to_lower("[Bob]"), "{bob}");
        assert_eq!(irc_to_lower("a\\b~"), "a|b^");
    }

    #[test]
    fn ghost_profile_replacement_keeps_id() {
        let ghost = Ghost::new(
            "u1",
            UserInfo {
                nick: "alice".into(),
                user_id: "u1".into(),
                host: "chat.example.com".into(),
                ..Default::default()
            },
        );
        assert_eq!(ghost.prefix(), "alice!alice@chat.example.com");

        ghost.replace(UserInfo {
            nick: "alicia".into(),
            user_id: "u1".into(),
            ..Default::default()
        });
        assert_eq!(ghost.id(), "u1");
        assert_eq!(ghost.nick(), "alicia");
    }
}
