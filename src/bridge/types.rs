//! Backend-agnostic identity, channel and history types.

/// Nick of the synthetic identity backends use for automated membership
/// changes.
pub const SYSTEM_NICK: &str = "system";

/// Snapshot of a backend user as seen by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// IRC nick derived from the backend display preference.
    pub nick: String,
    /// Stable backend user id.
    pub user_id: String,
    /// Backend login name.
    pub username: String,
    pub real_name: String,
    /// Host part of the IRC prefix (usually the backend URL).
    pub host: String,
    pub roles: String,
    /// Team the user was observed under. Only set for the owner.
    pub team_id: String,
    /// True for exactly one user per session: the owner.
    pub me: bool,
    pub ghost: bool,
}

impl UserInfo {
    /// The synthetic adder of membership events generated by the backend.
    pub fn system() -> Self {
        Self {
            nick: SYSTEM_NICK.to_string(),
            ..Default::default()
        }
    }

    /// Placeholder for a user the backend could not describe.
    pub fn unknown(user_id: &str) -> Self {
        Self {
            nick: user_id.to_string(),
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            ghost: true,
            ..Default::default()
        }
    }

    /// The per-protocol service identity topics are attributed to.
    pub fn service(protocol: &str) -> Self {
        Self {
            nick: protocol.to_string(),
            user_id: format!("{protocol}.service"),
            username: protocol.to_string(),
            real_name: format!("{protocol} service"),
            host: "service".to_string(),
            ..Default::default()
        }
    }

    pub fn is_system(&self) -> bool {
        self.nick == SYSTEM_NICK && self.user_id.is_empty()
    }
}

/// Snapshot of a backend channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub id: String,
    pub team_id: String,
}

impl ChannelInfo {
    /// Direct-message channels are named `<user id>__<user id>`.
    pub fn is_direct(&self) -> bool {
        self.name.contains("__")
    }

    /// The other participant of a direct-message channel.
    pub fn direct_counterpart(&self, me: &str) -> Option<&str> {
        let (a, b) = self.name.split_once("__")?;
        if a == me { Some(b) } else { Some(a) }
    }
}

/// Credentials handed to a backend on login.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub login: String,
    pub team: String,
    pub pass: String,
    pub server: String,
    pub token: String,
}

/// Channel kind as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Open,
    Private,
    Direct,
    Group,
    #[default]
    Unknown,
}

impl ChannelKind {
    /// Parse the one-letter backend tag (`O`, `P`, `D`, `G`).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "O" => Self::Open,
            "P" => Self::Private,
            "D" => Self::Direct,
            "G" => Self::Group,
            _ => Self::Unknown,
        }
    }
}

/// A file attached to a post, rendered as a download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
}

/// Classification of a history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostType {
    Regular,
    /// Join/leave/add/remove system messages.
    Membership,
    HeaderChange,
    System(String),
}

impl PostType {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "" => Self::Regular,
            "system_join_leave"
            | "system_join_channel"
            | "system_leave_channel"
            | "system_add_to_channel"
            | "system_remove_from_channel" => Self::Membership,
            "system_header_change" => Self::HeaderChange,
            other => Self::System(other.to_string()),
        }
    }
}

/// Normalized history entry returned by `get_posts_since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub post_type: PostType,
    /// Milliseconds since the epoch.
    pub create_at: i64,
    /// Milliseconds since the epoch, 0 when not deleted.
    pub delete_at: i64,
}

impl Post {
    /// Deleted after creation.
    pub fn is_soft_deleted(&self) -> bool {
        self.delete_at > self.create_at
    }
}
