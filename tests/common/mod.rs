//! Integration test common infrastructure.
//!
//! Provides an in-memory backend implementing `Bridger`, a connector that
//! hands its event sender to the test, and helpers for asserting on what the
//! IRC client would see.

#![allow(dead_code)]

pub mod mattermost;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use slircd_bridge::bridge::{
    Bridger, ChannelInfo, ConnectContext, Connector, Event, Post, PostType, UserInfo,
};
use slircd_bridge::irc::{Outbound, VirtualServer};
use slircd_bridge::{BridgeError, BridgeResult, Config, Session};

pub const PROTOCOL: &str = "fake";
pub const OWNER_NICK: &str = "owner";
pub const ME_ID: &str = "me-id";

/// How long a test waits for an outbound record before failing.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn user(id: &str, nick: &str) -> UserInfo {
    UserInfo {
        nick: nick.to_string(),
        user_id: id.to_string(),
        username: nick.to_string(),
        host: "chat.example.com".to_string(),
        ghost: true,
        ..Default::default()
    }
}

pub fn post(user_id: &str, message: &str, create_at: i64) -> Post {
    Post {
        id: format!("post-{create_at}"),
        user_id: user_id.to_string(),
        message: message.to_string(),
        post_type: PostType::Regular,
        create_at,
        delete_at: 0,
    }
}

/// A backend channel of the fake.
#[derive(Clone, Default)]
pub struct FakeChannel {
    pub info: ChannelInfo,
    pub members: Vec<String>,
    pub topic: String,
    pub last_viewed: i64,
    /// Newest first. `None` makes history unavailable.
    pub posts: Option<Vec<Post>>,
}

impl FakeChannel {
    pub fn new(id: &str, name: &str, members: &[&str]) -> Self {
        Self {
            info: ChannelInfo {
                name: name.to_string(),
                id: id.to_string(),
                team_id: "team".to_string(),
            },
            members: members.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn viewed_at(mut self, ts: i64, posts: Vec<Post>) -> Self {
        self.last_viewed = ts;
        self.posts = Some(posts);
        self
    }

    pub fn on_team(mut self, team_id: &str) -> Self {
        self.info.team_id = team_id.to_string();
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }
}

/// In-memory backend.
pub struct FakeBridge {
    me: UserInfo,
    users: Mutex<HashMap<String, UserInfo>>,
    channels: Mutex<Vec<FakeChannel>>,
    status: Mutex<String>,
    /// Channels marked viewed, in order.
    pub viewed: Mutex<Vec<String>>,
    /// `(target id, text)` for every message sent to the backend.
    pub sent: Mutex<Vec<(String, String)>>,
    pub logged_out: AtomicBool,
}

impl FakeBridge {
    pub fn new(users: Vec<UserInfo>, channels: Vec<FakeChannel>) -> Arc<Self> {
        let me = UserInfo {
            me: true,
            team_id: "team".to_string(),
            ..user(ME_ID, "backend-me")
        };
        let mut all: HashMap<String, UserInfo> =
            users.into_iter().map(|u| (u.user_id.clone(), u)).collect();
        all.insert(me.user_id.clone(), me.clone());

        Arc::new(Self {
            me,
            users: Mutex::new(all),
            channels: Mutex::new(channels),
            status: Mutex::new("online".to_string()),
            viewed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            logged_out: AtomicBool::new(false),
        })
    }

    pub fn set_backend_status(&self, status: &str) {
        *self.status.lock() = status.to_string();
    }

    pub fn add_channel(&self, channel: FakeChannel) {
        self.channels.lock().push(channel);
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn channel(&self, id: &str) -> Option<FakeChannel> {
        self.channels.lock().iter().find(|c| c.info.id == id).cloned()
    }
}

#[async_trait]
impl Bridger for FakeBridge {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn get_me(&self) -> UserInfo {
        self.me.clone()
    }

    fn get_users(&self) -> Vec<UserInfo> {
        self.users.lock().values().cloned().collect()
    }

    async fn get_user(&self, user_id: &str) -> UserInfo {
        self.users
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserInfo::unknown(user_id))
    }

    async fn get_user_by_username(&self, username: &str) -> Option<UserInfo> {
        self.users
            .lock()
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    fn get_channels(&self) -> Vec<ChannelInfo> {
        self.channels.lock().iter().map(|c| c.info.clone()).collect()
    }

    fn get_channel_name(&self, channel_id: &str) -> String {
        match self.channel(channel_id) {
            Some(c) if c.info.team_id != self.me.team_id => {
                format!("#{}/{}", c.info.team_id, c.info.name)
            }
            Some(c) => format!("#{}", c.info.name),
            None => channel_id.to_string(),
        }
    }

    // Channel names carry the team id; no separate team names.
    fn get_team_name(&self, _team_id: &str) -> String {
        String::new()
    }

    async fn get_channel_users(&self, channel_id: &str) -> BridgeResult<Vec<UserInfo>> {
        let channel = self
            .channel(channel_id)
            .ok_or_else(|| BridgeError::NoSuchChannel(channel_id.to_string()))?;
        let users = self.users.lock();
        Ok(channel
            .members
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect())
    }

    async fn topic(&self, channel_id: &str) -> String {
        self.channel(channel_id).map(|c| c.topic).unwrap_or_default()
    }

    async fn update_channels(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn get_last_viewed(&self, channel_id: &str) -> i64 {
        self.channel(channel_id).map(|c| c.last_viewed).unwrap_or(0)
    }

    async fn update_last_viewed(&self, channel_id: &str) {
        self.viewed.lock().push(channel_id.to_string());
    }

    async fn get_posts_since(&self, channel_id: &str, since: i64) -> Option<Vec<Post>> {
        let posts = self.channel(channel_id)?.posts?;
        Some(posts.into_iter().filter(|p| p.create_at > since).collect())
    }

    async fn join(&self, channel_name: &str) -> BridgeResult<(String, String)> {
        let mut channels = self.channels.lock();
        let channel = channels
            .iter_mut()
            .find(|c| c.info.name == channel_name)
            .ok_or_else(|| BridgeError::CannotJoin(channel_name.to_string()))?;
        channel.members.push(ME_ID.to_string());
        Ok((channel.info.id.clone(), channel.topic.clone()))
    }

    async fn part(&self, channel_id: &str) -> BridgeResult<()> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.iter_mut().find(|c| c.info.id == channel_id) {
            channel.members.retain(|m| m != ME_ID);
        }
        Ok(())
    }

    async fn set_topic(&self, channel_id: &str, text: &str) -> BridgeResult<()> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.iter_mut().find(|c| c.info.id == channel_id) {
            channel.topic = text.to_string();
        }
        Ok(())
    }

    async fn kick(&self, _channel_id: &str, _user_id: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn invite(&self, _channel_id: &str, _user_id: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn msg_user(&self, user_id: &str, text: &str) -> BridgeResult<()> {
        self.sent
            .lock()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn msg_channel(&self, channel_id: &str, text: &str) -> BridgeResult<()> {
        self.sent
            .lock()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn status_user(&self, _user_id: &str) -> BridgeResult<String> {
        Ok(self.status.lock().clone())
    }

    async fn set_status(&self, status: &str) -> BridgeResult<()> {
        self.set_backend_status(status);
        Ok(())
    }

    async fn nick(&self, _name: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn logout(&self) -> BridgeResult<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out a shared [`FakeBridge`] and exposing the event
/// sender of the last login.
pub struct FakeConnector {
    pub bridge: Arc<FakeBridge>,
    events: Mutex<Option<mpsc::Sender<Event>>>,
}

impl FakeConnector {
    pub fn new(bridge: Arc<FakeBridge>) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            events: Mutex::new(None),
        })
    }

    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.lock().clone().expect("logged in")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    async fn connect(&self, ctx: ConnectContext) -> BridgeResult<Arc<dyn Bridger>> {
        *self.events.lock() = Some(ctx.events);
        Ok(self.bridge.clone())
    }
}

/// A session wired to a [`FakeBridge`] and the client stream of its server.
pub struct Harness {
    pub session: Session,
    pub server: Arc<VirtualServer>,
    pub connector: Arc<FakeConnector>,
    pub out: mpsc::UnboundedReceiver<Outbound>,
    /// Everything drained from `out` so far.
    pub seen: Vec<Outbound>,
}

impl Harness {
    pub fn new(config: &str, bridge: Arc<FakeBridge>) -> Self {
        let config = Arc::new(Config::parse(config).expect("config"));
        let (server, out) = VirtualServer::new();
        let connector = FakeConnector::new(bridge);
        let mut session = Session::new(server.clone(), config, OWNER_NICK);
        session.register(connector.clone());
        Self {
            session,
            server,
            connector,
            out,
            seen: Vec::new(),
        }
    }

    pub fn bridge(&self) -> &Arc<FakeBridge> {
        &self.connector.bridge
    }

    /// Log in and wait for the backfill to finish.
    pub async fn login(&mut self) {
        self.session
            .login_to(PROTOCOL, Default::default())
            .await
            .expect("login");
        self.session
            .wait_backfill(PROTOCOL)
            .await
            .expect("backfill");
        self.drain();
    }

    pub async fn send(&self, event: Event) {
        self.connector.events().send(event).await.expect("send");
    }

    /// Move whatever is queued on the client stream into `seen`.
    pub fn drain(&mut self) {
        while let Ok(msg) = self.out.try_recv() {
            self.seen.push(msg);
        }
    }

    /// Wait until a record matching `pred` arrives; returns it.
    pub async fn expect(&mut self, pred: impl Fn(&Outbound) -> bool) -> Outbound {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.out.recv())
                .await
                .expect("timed out waiting for outbound record")
                .expect("client stream closed");
            self.seen.push(msg.clone());
            if pred(&msg) {
                return msg;
            }
        }
    }

    pub fn joined(&self, channel: &str, nick: &str) -> bool {
        self.seen.iter().any(|m| {
            matches!(m, Outbound::Join { channel: c, nick: n } if c == channel && n == nick)
        })
    }
}
