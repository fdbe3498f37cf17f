//! Mattermost transport port.
//!
//! The HTTP and websocket client lives outside this crate; the adapter only
//! needs the calls below. Implementations must be cheap to share behind an
//! `Arc`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::model::{Channel, Post, PostList, Team, User, WsEvent};
use crate::bridge::Credentials;

/// Errors reported by a transport implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A logged-in account: the user and its primary team.
#[derive(Debug, Clone, Default)]
pub struct LoginSession {
    pub user: User,
    pub team: Team,
}

#[async_trait]
pub trait MattermostApi: Send + Sync {
    /// Base URL, shown as the host of ghost prefixes.
    fn url(&self) -> String;

    async fn login(&self, credentials: &Credentials) -> Result<LoginSession, ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;

    /// Open the websocket. The stream ends when the connection drops.
    async fn connect_websocket(&self) -> Result<mpsc::Receiver<WsEvent>, ApiError>;

    // === Users ===

    async fn get_users(&self) -> Result<Vec<User>, ApiError>;
    async fn get_user(&self, user_id: &str) -> Result<User, ApiError>;
    async fn get_user_by_username(&self, username: &str) -> Result<User, ApiError>;
    async fn get_status(&self, user_id: &str) -> Result<String, ApiError>;
    async fn update_status(&self, user_id: &str, status: &str) -> Result<(), ApiError>;
    async fn update_nickname(&self, user_id: &str, nick: &str) -> Result<(), ApiError>;

    // === Teams and channels ===

    async fn get_teams(&self) -> Result<Vec<Team>, ApiError>;
    async fn get_team_by_name(&self, name: &str) -> Result<Team, ApiError>;
    /// Channels the owner belongs to in one team (direct and group channels
    /// included).
    async fn get_channels_for_team(&self, team_id: &str) -> Result<Vec<Channel>, ApiError>;
    async fn get_channel_by_name(&self, team_id: &str, name: &str) -> Result<Channel, ApiError>;
    async fn get_channel_members(
        &self,
        channel_id: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<User>, ApiError>;
    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<(), ApiError>;
    async fn remove_channel_member(&self, channel_id: &str, user_id: &str)
    -> Result<(), ApiError>;
    async fn patch_channel_header(&self, channel_id: &str, header: &str) -> Result<(), ApiError>;
    async fn create_direct_channel(&self, user_a: &str, user_b: &str)
    -> Result<Channel, ApiError>;
    async fn get_last_viewed_at(&self, channel_id: &str) -> Result<i64, ApiError>;
    async fn view_channel(&self, channel_id: &str) -> Result<(), ApiError>;

    // === Posts ===

    async fn get_post(&self, post_id: &str) -> Result<Post, ApiError>;
    async fn get_posts_since(&self, channel_id: &str, since: i64) -> Result<PostList, ApiError>;
    async fn create_post(&self, post: Post) -> Result<Post, ApiError>;
    async fn get_file_links(&self, file_ids: &[String]) -> Result<Vec<String>, ApiError>;
}
