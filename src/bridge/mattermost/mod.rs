//! Mattermost backend adapter.
//!
//! Owns the backend session behind a [`MattermostApi`] transport, keeps
//! user/team/channel caches, and turns websocket traffic into normalized
//! [`Event`](crate::bridge::Event)s (see [`ws`]).

mod api;
mod idle;
pub mod model;
pub mod nick;
mod ws;

pub use api::{ApiError, LoginSession, MattermostApi};

use async_trait::async_trait;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::{Map, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, warn};

use self::model::{Channel, Team, User};
use crate::bridge::{
    Bridger, ChannelInfo, ConnectContext, Connector, Event, Post, PostType, UserInfo,
};
use crate::config::ProtocolConfig;
use crate::error::{BridgeError, BridgeResult};

/// Protocol name and configuration namespace.
pub const PROTOCOL: &str = "mattermost";

/// Prefix of the post prop marking posts the bridge sent itself. The owner's
/// user id completes the key.
pub const ECHO_MARKER_PREFIX: &str = "slircd_";

/// Page size for channel member listing.
const MEMBERS_PER_PAGE: usize = 200;

/// Pause between two full member pages.
const MEMBERS_PAGE_DELAY: Duration = Duration::from_millis(200);

/// Registers the Mattermost adapter with a session.
pub struct MattermostConnector {
    api: Arc<dyn MattermostApi>,
}

impl MattermostConnector {
    pub fn new(api: Arc<dyn MattermostApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Connector for MattermostConnector {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    async fn connect(&self, ctx: ConnectContext) -> BridgeResult<Arc<dyn Bridger>> {
        let adapter = Mattermost::connect(self.api.clone(), ctx).await?;
        Ok(adapter)
    }
}

/// A connected Mattermost session.
pub struct Mattermost {
    api: Arc<dyn MattermostApi>,
    config: Arc<ProtocolConfig>,
    me: User,
    team: Team,
    url: String,
    users: DashMap<String, User>,
    channels: DashMap<String, Channel>,
    teams: DashMap<String, Team>,
    events: mpsc::Sender<Event>,
    /// Coalesces channel-list refreshes triggered by websocket traffic.
    refresh_limiter: DefaultDirectRateLimiter,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    span: Span,
}

impl Mattermost {
    /// Log in, fill the caches, and start the websocket and anti-idle tasks.
    pub async fn connect(
        api: Arc<dyn MattermostApi>,
        ctx: ConnectContext,
    ) -> BridgeResult<Arc<Self>> {
        let ConnectContext {
            config,
            credentials,
            events,
            shutdown,
            tasks,
            span,
        } = ctx;

        info!(
            parent: &span,
            login = %credentials.login,
            team = %credentials.team,
            server = %credentials.server,
            "logging in"
        );

        let session = api.login(&credentials).await.map_err(|e| {
            error!(parent: &span, error = %e, "login failed");
            BridgeError::Login(e.to_string())
        })?;

        info!(parent: &span, user = %session.user.username, "login succeeded");

        let quota = Quota::with_period(config.refresh_interval())
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN));

        let mm = Arc::new(Self {
            url: api.url(),
            api,
            config,
            me: session.user,
            team: session.team,
            users: DashMap::new(),
            channels: DashMap::new(),
            teams: DashMap::new(),
            events,
            refresh_limiter: RateLimiter::direct(quota),
            shutdown,
            tasks,
            span,
        });

        mm.update_users().await?;
        mm.update_channels().await?;

        let ws = mm.api.connect_websocket().await?;
        mm.tasks
            .spawn(ws::run(mm.clone(), ws).instrument(mm.span.clone()));

        if !mm.config.disable_auto_view {
            for channel_id in mm.anti_idle_channels() {
                mm.tasks
                    .spawn(idle::run(mm.clone(), channel_id).instrument(mm.span.clone()));
            }
        }

        Ok(mm)
    }

    fn anti_idle_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.team_id == self.team.id && self.config.anti_idle.contains(&c.name))
            .map(|c| c.id.clone())
            .collect()
    }

    async fn update_users(&self) -> BridgeResult<()> {
        let users = self.api.get_users().await?;
        debug!(parent: &self.span, count = users.len(), "loaded users");
        for user in users {
            self.users.insert(user.id.clone(), user);
        }
        Ok(())
    }

    /// Schedule a channel-list refresh unless one ran within the refresh
    /// interval.
    fn request_refresh(self: &Arc<Self>) {
        if self.refresh_limiter.check().is_err() {
            debug!(parent: &self.span, "channel refresh throttled");
            return;
        }

        let mm = self.clone();
        self.tasks.spawn(
            async move {
                if let Err(e) = mm.update_channels().await {
                    warn!(error = %e, "channel refresh failed");
                }
            }
            .instrument(self.span.clone()),
        );
    }

    /// Refresh the channel list right away when `channel_id` is not cached,
    /// so events naming it resolve to a real channel name.
    async fn ensure_channel(&self, channel_id: &str) {
        if channel_id.is_empty() || self.channels.contains_key(channel_id) {
            return;
        }

        debug!(parent: &self.span, channel = %channel_id, "uncached channel, refreshing");
        if let Err(e) = self.update_channels().await {
            warn!(parent: &self.span, channel = %channel_id, error = %e, "channel refresh failed");
        }
    }

    fn create_user(&self, user: &User) -> UserInfo {
        let mut nick = user.username.clone();
        if self.config.prefer_nickname && nick::is_valid_nick(&user.nickname) {
            nick = user.nickname.clone();
        }

        let me = user.id == self.me.id;

        UserInfo {
            nick,
            user_id: user.id.clone(),
            username: user.username.clone(),
            real_name: format!("{} {}", user.first_name, user.last_name),
            host: self.url.clone(),
            roles: user.roles.clone(),
            team_id: if me { self.team.id.clone() } else { String::new() },
            me,
            ghost: true,
        }
    }

    fn echo_marker(&self) -> String {
        format!("{ECHO_MARKER_PREFIX}{}", self.me.id)
    }

    fn marked_props(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert(self.echo_marker(), Value::Bool(true));
        props
    }

    async fn file_links(&self, file_ids: &[String]) -> Vec<crate::bridge::File> {
        if file_ids.is_empty() {
            return Vec::new();
        }
        match self.api.get_file_links(file_ids).await {
            Ok(links) => links
                .into_iter()
                .map(|name| crate::bridge::File { name })
                .collect(),
            Err(e) => {
                warn!(parent: &self.span, error = %e, "failed to resolve file links");
                Vec::new()
            }
        }
    }

    async fn emit(&self, event: Event) -> BridgeResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| BridgeError::EventChannelClosed)
    }
}

#[async_trait]
impl Bridger for Mattermost {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn get_me(&self) -> UserInfo {
        self.create_user(&self.me)
    }

    fn get_users(&self) -> Vec<UserInfo> {
        self.users.iter().map(|u| self.create_user(&u)).collect()
    }

    async fn get_user(&self, user_id: &str) -> UserInfo {
        if let Some(user) = self.users.get(user_id) {
            return self.create_user(&user);
        }

        match self.api.get_user(user_id).await {
            Ok(user) => {
                let info = self.create_user(&user);
                self.users.insert(user.id.clone(), user);
                info
            }
            Err(e) => {
                debug!(parent: &self.span, user = %user_id, error = %e, "unknown user");
                UserInfo::unknown(user_id)
            }
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Option<UserInfo> {
        if let Some(user) = self.users.iter().find(|u| u.username == username) {
            return Some(self.create_user(&user));
        }

        match self.api.get_user_by_username(username).await {
            Ok(user) => {
                let info = self.create_user(&user);
                self.users.insert(user.id.clone(), user);
                Some(info)
            }
            Err(e) => {
                debug!(parent: &self.span, username = %username, error = %e, "unknown username");
                None
            }
        }
    }

    fn get_channels(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|c| ChannelInfo {
                name: c.name.clone(),
                id: c.id.clone(),
                team_id: c.team_id.clone(),
            })
            .collect()
    }

    fn get_channel_name(&self, channel_id: &str) -> String {
        let Some(channel) = self.channels.get(channel_id) else {
            return channel_id.to_string();
        };
        if channel.name.is_empty() {
            return channel_id.to_string();
        }

        let own_team = channel.team_id.is_empty() || channel.team_id == self.team.id;
        let team_name = self.get_team_name(&channel.team_id);

        if !channel.team_id.is_empty()
            && !team_name.is_empty()
            && (!own_team || self.config.prefix_main_team)
        {
            format!("#{}/{}", team_name, channel.name)
        } else {
            format!("#{}", channel.name)
        }
    }

    fn get_team_name(&self, team_id: &str) -> String {
        self.teams
            .get(team_id)
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    async fn get_channel_users(&self, channel_id: &str) -> BridgeResult<Vec<UserInfo>> {
        let mut users = Vec::new();
        let mut page = 0;

        loop {
            let batch = self
                .api
                .get_channel_members(channel_id, page, MEMBERS_PER_PAGE)
                .await?;
            let full = batch.len() == MEMBERS_PER_PAGE;

            for user in batch {
                users.push(self.create_user(&user));
                self.users.entry(user.id.clone()).or_insert(user);
            }

            if !full {
                break;
            }
            page += 1;
            tokio::time::sleep(MEMBERS_PAGE_DELAY).await;
        }

        Ok(users)
    }

    async fn topic(&self, channel_id: &str) -> String {
        self.channels
            .get(channel_id)
            .map(|c| c.header.clone())
            .unwrap_or_default()
    }

    async fn update_channels(&self) -> BridgeResult<()> {
        let teams = self.api.get_teams().await?;

        for team in teams {
            let channels = self.api.get_channels_for_team(&team.id).await?;
            for channel in channels {
                self.channels.insert(channel.id.clone(), channel);
            }
            self.teams.insert(team.id.clone(), team);
        }

        debug!(parent: &self.span, channels = self.channels.len(), "channel list updated");
        Ok(())
    }

    async fn get_last_viewed(&self, channel_id: &str) -> i64 {
        self.api
            .get_last_viewed_at(channel_id)
            .await
            .unwrap_or_else(|e| {
                debug!(parent: &self.span, channel = %channel_id, error = %e, "no last viewed");
                0
            })
    }

    async fn update_last_viewed(&self, channel_id: &str) {
        if let Err(e) = self.api.view_channel(channel_id).await {
            warn!(
                parent: &self.span,
                channel = %channel_id,
                error = %e,
                "failed to mark channel viewed"
            );
        }
    }

    async fn get_posts_since(&self, channel_id: &str, since: i64) -> Option<Vec<Post>> {
        let mut list = match self.api.get_posts_since(channel_id, since).await {
            Ok(list) => list,
            Err(e) => {
                debug!(parent: &self.span, channel = %channel_id, error = %e, "posts unavailable");
                return None;
            }
        };

        let posts = list
            .order
            .iter()
            .filter_map(|id| list.posts.remove(id))
            .map(|p| Post {
                post_type: PostType::from_type(&p.post_type),
                id: p.id,
                user_id: p.user_id,
                message: p.message,
                create_at: p.create_at,
                delete_at: p.delete_at,
            })
            .collect();

        Some(posts)
    }

    async fn join(&self, channel_name: &str) -> BridgeResult<(String, String)> {
        let channel_name = channel_name.trim_start_matches('#');
        let (team_id, name) = match channel_name.split_once('/') {
            Some((team, name)) => {
                let team = self
                    .api
                    .get_team_by_name(team)
                    .await
                    .map_err(|_| BridgeError::CannotJoin(channel_name.to_string()))?;
                (team.id, name)
            }
            None => (self.team.id.clone(), channel_name),
        };

        let channel = self
            .api
            .get_channel_by_name(&team_id, name)
            .await
            .map_err(|_| BridgeError::CannotJoin(channel_name.to_string()))?;

        self.api
            .add_channel_member(&channel.id, &self.me.id)
            .await
            .map_err(|e| {
                debug!(parent: &self.span, channel = %channel_name, error = %e, "join failed");
                BridgeError::CannotJoin(channel_name.to_string())
            })?;

        let result = (channel.id.clone(), channel.header.clone());
        self.channels.insert(channel.id.clone(), channel);
        Ok(result)
    }

    async fn part(&self, channel_id: &str) -> BridgeResult<()> {
        self.api
            .remove_channel_member(channel_id, &self.me.id)
            .await?;
        Ok(())
    }

    async fn set_topic(&self, channel_id: &str, text: &str) -> BridgeResult<()> {
        debug!(parent: &self.span, channel = %channel_id, "updating channel header");
        self.api.patch_channel_header(channel_id, text).await?;
        if let Some(mut channel) = self.channels.get_mut(channel_id) {
            channel.header = text.to_string();
        }
        Ok(())
    }

    async fn kick(&self, channel_id: &str, user_id: &str) -> BridgeResult<()> {
        self.api.remove_channel_member(channel_id, user_id).await?;
        Ok(())
    }

    async fn invite(&self, channel_id: &str, user_id: &str) -> BridgeResult<()> {
        self.api.add_channel_member(channel_id, user_id).await?;
        Ok(())
    }

    async fn msg_user(&self, user_id: &str, text: &str) -> BridgeResult<()> {
        let direct = self
            .api
            .create_direct_channel(&self.me.id, user_id)
            .await?;
        self.msg_channel(&direct.id, text).await
    }

    async fn msg_channel(&self, channel_id: &str, text: &str) -> BridgeResult<()> {
        let post = model::Post {
            channel_id: channel_id.to_string(),
            message: text.to_string(),
            props: self.marked_props(),
            ..Default::default()
        };
        self.api.create_post(post).await?;
        Ok(())
    }

    async fn status_user(&self, user_id: &str) -> BridgeResult<String> {
        Ok(self.api.get_status(user_id).await?)
    }

    async fn set_status(&self, status: &str) -> BridgeResult<()> {
        self.api.update_status(&self.me.id, status).await?;
        Ok(())
    }

    async fn nick(&self, name: &str) -> BridgeResult<()> {
        self.api.update_nickname(&self.me.id, name).await?;
        Ok(())
    }

    async fn logout(&self) -> BridgeResult<()> {
        self.shutdown.cancel();
        match self.api.logout().await {
            Ok(()) => info!(parent: &self.span, "logout succeeded"),
            Err(e) => error!(parent: &self.span, error = %e, "logout failed"),
        }
        Ok(())
    }
}
