//! Scripted Mattermost transport.
//!
//! Serves users, channels and posts from memory, records writes, and lets
//! the test inject websocket events.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Span;

use slircd_bridge::bridge::mattermost::model::{
    Broadcast, Channel, Post, PostList, Team, User, WsEvent,
};
use slircd_bridge::bridge::mattermost::{ApiError, LoginSession, Mattermost, MattermostApi};
use slircd_bridge::bridge::{ConnectContext, Credentials, Event};
use slircd_bridge::config::ProtocolConfig;

pub const ME: &str = "mm-me";
pub const TEAM: &str = "team-1";

pub fn mm_user(id: &str, username: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        ..Default::default()
    }
}

pub fn mm_channel(id: &str, name: &str, kind: &str) -> Channel {
    Channel {
        id: id.to_string(),
        name: name.to_string(),
        team_id: if kind == "D" || kind == "G" {
            String::new()
        } else {
            TEAM.to_string()
        },
        channel_type: kind.to_string(),
        ..Default::default()
    }
}

pub fn mm_post(id: &str, user_id: &str, channel_id: &str, message: &str) -> Post {
    Post {
        id: id.to_string(),
        user_id: user_id.to_string(),
        channel_id: channel_id.to_string(),
        message: message.to_string(),
        create_at: 1_700_000_000_000,
        ..Default::default()
    }
}

/// `posted` (or `post_edited`) websocket event carrying `post`.
pub fn posted(event: &str, post: &Post, channel_type: &str) -> WsEvent {
    let mut data = Map::new();
    data.insert(
        "post".to_string(),
        Value::String(serde_json::to_string(post).expect("encode post")),
    );
    data.insert("channel_type".to_string(), json!(channel_type));
    WsEvent {
        event: event.to_string(),
        data,
        broadcast: Broadcast {
            channel_id: post.channel_id.clone(),
            ..Default::default()
        },
    }
}

pub struct FakeApi {
    me: User,
    team: Team,
    users: Mutex<Vec<User>>,
    channels: Mutex<Vec<Channel>>,
    posts: Mutex<HashMap<String, Post>>,
    ws: Mutex<Option<mpsc::Sender<WsEvent>>>,
    /// Posts created through the bridge.
    pub created: Mutex<Vec<Post>>,
    pub viewed: Mutex<Vec<String>>,
    /// Number of channel-list fetches.
    channel_fetches: AtomicUsize,
}

impl FakeApi {
    pub fn new(users: Vec<User>, channels: Vec<Channel>) -> Arc<Self> {
        let me = mm_user(ME, "owner");
        let mut all = users;
        all.push(me.clone());
        Arc::new(Self {
            me,
            team: Team {
                id: TEAM.to_string(),
                name: "acme".to_string(),
                ..Default::default()
            },
            users: Mutex::new(all),
            channels: Mutex::new(channels),
            posts: Mutex::new(HashMap::new()),
            ws: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            viewed: Mutex::new(Vec::new()),
            channel_fetches: AtomicUsize::new(0),
        })
    }

    /// Create a channel on the server side only; the adapter learns about
    /// it on its next channel-list refresh.
    pub fn add_channel(&self, channel: Channel) {
        self.channels.lock().push(channel);
    }

    pub fn channel_fetches(&self) -> usize {
        self.channel_fetches.load(Ordering::SeqCst)
    }

    /// Times `channel_id` was marked viewed.
    pub fn views_of(&self, channel_id: &str) -> usize {
        self.viewed.lock().iter().filter(|c| *c == channel_id).count()
    }

    pub fn store_post(&self, post: Post) {
        self.posts.lock().insert(post.id.clone(), post);
    }

    pub async fn push(&self, event: WsEvent) {
        let ws = self.ws.lock().clone().expect("websocket open");
        ws.send(event).await.expect("websocket send");
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::NotFound(what.to_string())
    }
}

#[async_trait]
impl MattermostApi for FakeApi {
    fn url(&self) -> String {
        "chat.example.com".to_string()
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginSession, ApiError> {
        Ok(LoginSession {
            user: self.me.clone(),
            team: self.team.clone(),
        })
    }

    async fn logout(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn connect_websocket(&self) -> Result<mpsc::Receiver<WsEvent>, ApiError> {
        let (tx, rx) = mpsc::channel(64);
        *self.ws.lock() = Some(tx);
        Ok(rx)
    }

    async fn get_users(&self) -> Result<Vec<User>, ApiError> {
        Ok(self.users.lock().clone())
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        self.users
            .lock()
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| Self::not_found(user_id))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, ApiError> {
        self.users
            .lock()
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| Self::not_found(username))
    }

    async fn get_status(&self, _user_id: &str) -> Result<String, ApiError> {
        Ok("online".to_string())
    }

    async fn update_status(&self, _user_id: &str, _status: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn update_nickname(&self, _user_id: &str, _nick: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn get_teams(&self) -> Result<Vec<Team>, ApiError> {
        Ok(vec![self.team.clone()])
    }

    async fn get_team_by_name(&self, name: &str) -> Result<Team, ApiError> {
        if name == self.team.name {
            Ok(self.team.clone())
        } else {
            Err(Self::not_found(name))
        }
    }

    async fn get_channels_for_team(&self, _team_id: &str) -> Result<Vec<Channel>, ApiError> {
        self.channel_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.channels.lock().clone())
    }

    async fn get_channel_by_name(&self, _team_id: &str, name: &str) -> Result<Channel, ApiError> {
        self.channels
            .lock()
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    async fn get_channel_members(
        &self,
        _channel_id: &str,
        page: usize,
        _per_page: usize,
    ) -> Result<Vec<User>, ApiError> {
        if page > 0 {
            return Ok(Vec::new());
        }
        Ok(self.users.lock().clone())
    }

    async fn add_channel_member(&self, _channel_id: &str, _user_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn remove_channel_member(
        &self,
        _channel_id: &str,
        _user_id: &str,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn patch_channel_header(&self, _channel_id: &str, _header: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn create_direct_channel(&self, user_a: &str, user_b: &str) -> Result<Channel, ApiError> {
        Ok(mm_channel(
            &format!("dm-{user_b}"),
            &format!("{user_a}__{user_b}"),
            "D",
        ))
    }

    async fn get_last_viewed_at(&self, _channel_id: &str) -> Result<i64, ApiError> {
        Ok(0)
    }

    async fn view_channel(&self, channel_id: &str) -> Result<(), ApiError> {
        self.viewed.lock().push(channel_id.to_string());
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, ApiError> {
        self.posts
            .lock()
            .get(post_id)
            .cloned()
            .ok_or_else(|| Self::not_found(post_id))
    }

    async fn get_posts_since(&self, _channel_id: &str, _since: i64) -> Result<PostList, ApiError> {
        Ok(PostList::default())
    }

    async fn create_post(&self, post: Post) -> Result<Post, ApiError> {
        self.created.lock().push(post.clone());
        Ok(post)
    }

    async fn get_file_links(&self, file_ids: &[String]) -> Result<Vec<String>, ApiError> {
        Ok(file_ids
            .iter()
            .map(|id| format!("https://chat.example.com/files/{id}"))
            .collect())
    }
}

/// A connected adapter plus the receiving end of its event channel.
pub struct Adapter {
    pub api: Arc<FakeApi>,
    pub mm: Arc<Mattermost>,
    pub events: mpsc::Receiver<Event>,
    pub shutdown: CancellationToken,
    pub tasks: TaskTracker,
}

impl Adapter {
    pub async fn connect(api: Arc<FakeApi>, config: ProtocolConfig) -> Self {
        let (tx, events) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let ctx = ConnectContext {
            config: Arc::new(config),
            credentials: Credentials::default(),
            events: tx,
            shutdown: shutdown.clone(),
            tasks: tasks.clone(),
            span: Span::none(),
        };
        let mm = Mattermost::connect(api.clone(), ctx)
            .await
            .expect("connect");
        Self {
            api,
            mm,
            events,
            shutdown,
            tasks,
        }
    }

    /// Next normalized event, failing the test after [`super::WAIT`].
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(super::WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
