//! Backend abstraction.
//!
//! A backend is reached through two seams:
//! - [`Connector`]: registered with the session under its protocol name, it
//!   performs login and hands back a connected adapter.
//! - [`Bridger`]: the connected adapter's capability interface. The session
//!   engine only ever talks to `Arc<dyn Bridger>` and never branches on the
//!   protocol name.
//!
//! Adapters push normalized [`Event`]s into the channel handed to them in the
//! [`ConnectContext`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Span;

use crate::config::ProtocolConfig;
use crate::error::BridgeResult;

pub mod event;
pub mod mattermost;
pub mod types;

pub use event::{
    ChannelAddEvent, ChannelMessageEvent, ChannelRemoveEvent, ChannelTopicEvent,
    DirectMessageEvent, Event, FileEvent, MessageKind, StatusChangeEvent,
};
pub use types::{ChannelInfo, ChannelKind, Credentials, File, Post, PostType, UserInfo};

/// Everything an adapter needs to come up.
pub struct ConnectContext {
    pub config: Arc<ProtocolConfig>,
    pub credentials: Credentials,
    /// Normalized events for the session dispatcher.
    pub events: mpsc::Sender<Event>,
    /// Cancelled on session teardown.
    pub shutdown: CancellationToken,
    /// Background tasks must be spawned here so teardown can await them.
    pub tasks: TaskTracker,
    /// Session span; adapter logging happens inside it.
    pub span: Span,
}

/// Builds connected adapters for one protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Protocol name, also the configuration namespace.
    fn protocol(&self) -> &str;

    /// Log in and start the real-time subscription.
    async fn connect(&self, ctx: ConnectContext) -> BridgeResult<Arc<dyn Bridger>>;
}

/// Capability interface of a connected backend.
///
/// Lookups served from the adapter's caches are synchronous; anything that
/// may hit the backend is async.
#[async_trait]
pub trait Bridger: Send + Sync {
    fn protocol(&self) -> &str;

    // === Identity ===

    fn get_me(&self) -> UserInfo;
    fn get_users(&self) -> Vec<UserInfo>;
    async fn get_user(&self, user_id: &str) -> UserInfo;
    async fn get_user_by_username(&self, username: &str) -> Option<UserInfo>;

    // === Channels ===

    fn get_channels(&self) -> Vec<ChannelInfo>;
    /// IRC-visible name (`#name` or `#team/name`), or the id when unknown.
    fn get_channel_name(&self, channel_id: &str) -> String;
    fn get_team_name(&self, team_id: &str) -> String;
    async fn get_channel_users(&self, channel_id: &str) -> BridgeResult<Vec<UserInfo>>;
    async fn topic(&self, channel_id: &str) -> String;
    async fn update_channels(&self) -> BridgeResult<()>;

    // === History ===

    /// Last-viewed watermark in milliseconds, 0 when unknown.
    async fn get_last_viewed(&self, channel_id: &str) -> i64;
    async fn update_last_viewed(&self, channel_id: &str);
    /// Posts newer than `since`, newest first. `None` when unavailable.
    async fn get_posts_since(&self, channel_id: &str, since: i64) -> Option<Vec<Post>>;

    // === IRC-originated actions ===

    /// Join by IRC name (`name` or `team/name`); returns channel id and topic.
    async fn join(&self, channel_name: &str) -> BridgeResult<(String, String)>;
    async fn part(&self, channel_id: &str) -> BridgeResult<()>;
    async fn set_topic(&self, channel_id: &str, text: &str) -> BridgeResult<()>;
    async fn kick(&self, channel_id: &str, user_id: &str) -> BridgeResult<()>;
    async fn invite(&self, channel_id: &str, user_id: &str) -> BridgeResult<()>;
    async fn msg_user(&self, user_id: &str, text: &str) -> BridgeResult<()>;
    async fn msg_channel(&self, channel_id: &str, text: &str) -> BridgeResult<()>;
    async fn status_user(&self, user_id: &str) -> BridgeResult<String>;
    async fn set_status(&self, status: &str) -> BridgeResult<()>;
    async fn nick(&self, name: &str) -> BridgeResult<()>;
    async fn logout(&self) -> BridgeResult<()>;
}
