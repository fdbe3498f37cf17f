//! Normalized real-time events.
//!
//! Adapters translate backend-native notifications into [`Event`] values; the
//! session dispatcher matches on them exhaustively, so adding a variant fails
//! to compile until a handler exists.

use super::types::{ChannelKind, File, UserInfo};

/// Whether a channel line is shown as PRIVMSG or NOTICE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Message,
    /// Broadcast mentions (`@channel`, `@here`, `@all`).
    Notice,
}

#[derive(Debug, Clone)]
pub struct ChannelMessageEvent {
    pub text: String,
    pub channel_id: String,
    pub sender: UserInfo,
    pub kind: MessageKind,
    pub channel_kind: ChannelKind,
}

#[derive(Debug, Clone)]
pub struct DirectMessageEvent {
    pub text: String,
    pub sender: UserInfo,
    pub receiver: UserInfo,
}

#[derive(Debug, Clone)]
pub struct ChannelTopicEvent {
    pub text: String,
    pub channel_id: String,
    /// Backend username of whoever changed the topic.
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub sender: UserInfo,
    pub receiver: UserInfo,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub files: Vec<File>,
}

#[derive(Debug, Clone)]
pub struct ChannelAddEvent {
    pub adder: Option<UserInfo>,
    pub added: Vec<UserInfo>,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRemoveEvent {
    pub remover: Option<UserInfo>,
    pub removed: Vec<UserInfo>,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct StatusChangeEvent {
    pub user_id: String,
    pub status: String,
}

/// A backend event in bridge terms.
#[derive(Debug, Clone)]
pub enum Event {
    ChannelMessage(ChannelMessageEvent),
    DirectMessage(DirectMessageEvent),
    ChannelTopic(ChannelTopicEvent),
    FileShared(FileEvent),
    MemberAdded(ChannelAddEvent),
    MemberRemoved(ChannelRemoveEvent),
    ChannelCreated { channel_id: String },
    ChannelDeleted { channel_id: String },
    UserUpdated(UserInfo),
    StatusChanged(StatusChangeEvent),
}

impl Event {
    /// Short static name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChannelMessage(_) => "channel_message",
            Self::DirectMessage(_) => "direct_message",
            Self::ChannelTopic(_) => "channel_topic",
            Self::FileShared(_) => "file_shared",
            Self::MemberAdded(_) => "member_added",
            Self::MemberRemoved(_) => "member_removed",
            Self::ChannelCreated { .. } => "channel_created",
            Self::ChannelDeleted { .. } => "channel_deleted",
            Self::UserUpdated(_) => "user_updated",
            Self::StatusChanged(_) => "status_changed",
        }
    }
}
