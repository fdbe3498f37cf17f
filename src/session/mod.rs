//! Bridge session engine.
//!
//! A [`Session`] belongs to one IRC client. It owns the identity registry and
//! the virtual server handle, and keeps one [`Engine`] per backend the owner
//! is logged in to. Each login runs three kinds of supervised tasks:
//! - the event dispatcher,
//! - the backfill and its workers,
//! - whatever the adapter spawns (websocket loop, anti-idle).
//!
//! All of them observe the login's cancellation token and are awaited on
//! logout.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, info, warn};

use crate::bridge::{Bridger, ConnectContext, Connector, Credentials, UserInfo};
use crate::config::{BackfillConfig, BridgeConfig, Config, ProtocolConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::irc::{GhostRef, IrcChannel, IrcServer, RPL_NOWAWAY, RPL_UNAWAY};
use crate::telemetry::spans;

pub mod backfill;
mod dispatch;
mod membership;
pub mod readiness;
pub mod registry;
pub mod router;

pub use backfill::{ReplayLine, replay_lines};
pub use registry::IdentityRegistry;
pub use router::RoutingPolicy;

/// Connected state of one backend login.
pub struct Engine {
    server: Arc<dyn IrcServer>,
    bridge: Arc<dyn Bridger>,
    registry: Arc<IdentityRegistry>,
    policy: RoutingPolicy,
    protocol_cfg: Arc<ProtocolConfig>,
    bridge_cfg: BridgeConfig,
    backfill_cfg: BackfillConfig,
    /// Protocol service ghost; channel topics are attributed to it.
    service: GhostRef,
    /// Bridge service ghost; replay day markers come from it.
    announcer: GhostRef,
}

impl Engine {
    fn new(
        server: Arc<dyn IrcServer>,
        bridge: Arc<dyn Bridger>,
        registry: Arc<IdentityRegistry>,
        protocol_cfg: Arc<ProtocolConfig>,
        config: &Config,
    ) -> Self {
        let service = registry.resolve(&UserInfo::service(bridge.protocol()));
        let announcer = registry.resolve(&UserInfo {
            nick: config.bridge.service_nick.clone(),
            user_id: format!("{}.bridge", config.bridge.service_nick),
            username: config.bridge.service_nick.clone(),
            host: "service".to_string(),
            ..Default::default()
        });

        Self {
            server,
            policy: RoutingPolicy::new(
                protocol_cfg.join_include.clone(),
                protocol_cfg.join_exclude.clone(),
            ),
            bridge,
            registry,
            protocol_cfg,
            bridge_cfg: config.bridge.clone(),
            backfill_cfg: config.backfill.clone(),
            service,
            announcer,
        }
    }

    pub fn bridge(&self) -> &Arc<dyn Bridger> {
        &self.bridge
    }

    /// IRC channel of a backend channel.
    pub(crate) fn channel(&self, channel_id: &str) -> Arc<dyn IrcChannel> {
        self.server
            .channel(channel_id, &self.bridge.get_channel_name(channel_id))
    }

    pub(crate) fn users_channel(&self) -> Arc<dyn IrcChannel> {
        let name = &self.bridge_cfg.users_channel;
        self.server.channel(name, name)
    }

    pub(crate) fn overflow_channel(&self) -> Arc<dyn IrcChannel> {
        let name = &self.bridge_cfg.overflow_channel;
        self.server.channel(name, name)
    }

    /// Backend id of the channel shown on IRC as `name`.
    fn channel_id(&self, name: &str) -> BridgeResult<String> {
        self.bridge
            .get_channels()
            .into_iter()
            .find(|c| self.bridge.get_channel_name(&c.id) == name)
            .map(|c| c.id)
            .ok_or_else(|| BridgeError::NoSuchChannel(name.to_string()))
    }

    /// Backend id of the user shown on IRC as `nick`.
    fn user_id(&self, nick: &str) -> BridgeResult<String> {
        let ghost = self
            .server
            .lookup_by_nick(nick)
            .ok_or_else(|| BridgeError::NoSuchNick(nick.to_string()))?;
        if Arc::ptr_eq(&ghost, self.registry.owner()) {
            return Ok(self.bridge.get_me().user_id);
        }
        Ok(ghost.id().to_string())
    }
}

enum Link {
    /// Login in progress; holds the slot against concurrent logins.
    Connecting,
    Up(LinkHandle),
}

struct LinkHandle {
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    backfill: Option<JoinHandle<()>>,
    span: Span,
}

/// One IRC client's view of its backends.
pub struct Session {
    server: Arc<dyn IrcServer>,
    config: Arc<Config>,
    registry: Arc<IdentityRegistry>,
    connectors: HashMap<String, Arc<dyn Connector>>,
    links: Mutex<HashMap<String, Link>>,
}

impl Session {
    /// Create a session for the IRC client known as `owner_nick`.
    pub fn new(server: Arc<dyn IrcServer>, config: Arc<Config>, owner_nick: &str) -> Self {
        let registry = Arc::new(IdentityRegistry::new(server.clone(), owner_nick));
        Self {
            server,
            config,
            registry,
            connectors: HashMap::new(),
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Make a backend available under its protocol name.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.protocol().to_string(), connector);
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn owner(&self) -> &GhostRef {
        self.registry.owner()
    }

    pub fn is_logged_in(&self, protocol: &str) -> bool {
        matches!(self.links.lock().get(protocol), Some(Link::Up(_)))
    }

    /// Connected engine of a login.
    pub fn engine(&self, protocol: &str) -> BridgeResult<Arc<Engine>> {
        match self.links.lock().get(protocol) {
            Some(Link::Up(link)) => Ok(link.engine.clone()),
            _ => Err(BridgeError::NotLoggedIn(protocol.to_string())),
        }
    }

    /// Log in to `protocol` and start relaying.
    pub async fn login_to(&self, protocol: &str, credentials: Credentials) -> BridgeResult<()> {
        let connector = self
            .connectors
            .get(protocol)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownProtocol(protocol.to_string()))?;

        let protocol_cfg = Arc::new(self.config.protocol(protocol));
        if !protocol_cfg.is_valid_server(&credentials.server) {
            return Err(BridgeError::RestrictedServer {
                protocol: protocol.to_string(),
                server: credentials.server,
            });
        }

        {
            let mut links = self.links.lock();
            if links.contains_key(protocol) {
                return Err(BridgeError::AlreadyLoggedIn(protocol.to_string()));
            }
            links.insert(protocol.to_string(), Link::Connecting);
        }

        let span = spans::session(protocol, &self.registry.owner().nick());
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let (events_tx, events_rx) = mpsc::channel(self.config.bridge.event_queue.max(1));
        let (ready, waiter) = readiness::channel();

        let backfill = tasks.spawn(
            backfill::run(waiter, shutdown.clone(), tasks.clone())
                .instrument(spans::backfill(&span)),
        );

        let ctx = ConnectContext {
            config: protocol_cfg.clone(),
            credentials,
            events: events_tx,
            shutdown: shutdown.child_token(),
            tasks: tasks.clone(),
            span: span.clone(),
        };

        let bridge = match connector.connect(ctx).instrument(span.clone()).await {
            Ok(bridge) => bridge,
            Err(e) => {
                warn!(parent: &span, code = e.error_code(), error = %e, "login failed");
                shutdown.cancel();
                tasks.close();
                tasks.wait().await;
                self.links.lock().remove(protocol);
                return Err(e);
            }
        };

        let me = bridge.get_me();
        self.registry.bind_owner(&me);

        let engine = Arc::new(Engine::new(
            self.server.clone(),
            bridge.clone(),
            self.registry.clone(),
            protocol_cfg,
            &self.config,
        ));

        match bridge.status_user(&me.user_id).await {
            Ok(status) if status == "away" => {
                let nick = self.registry.owner().nick();
                self.server.encode_numeric(
                    RPL_NOWAWAY,
                    &[nick.as_str()],
                    "You have been marked as being away",
                );
            }
            Ok(_) => {}
            Err(e) => debug!(parent: &span, error = %e, "unable to fetch own status"),
        }

        ready.complete(engine.clone());
        tasks.spawn(
            dispatch::run(engine.clone(), events_rx, shutdown.clone()).instrument(span.clone()),
        );

        info!(parent: &span, user = %me.user_id, "logged in");
        self.links.lock().insert(
            protocol.to_string(),
            Link::Up(LinkHandle {
                engine,
                shutdown,
                tasks,
                backfill: Some(backfill),
                span,
            }),
        );
        Ok(())
    }

    /// Log out of `protocol`, stopping and awaiting every task of the login.
    pub async fn logout_from(&self, protocol: &str) -> BridgeResult<()> {
        let link = {
            let mut links = self.links.lock();
            match links.remove(protocol) {
                Some(Link::Up(link)) => link,
                Some(Link::Connecting) => {
                    links.insert(protocol.to_string(), Link::Connecting);
                    return Err(BridgeError::NotLoggedIn(protocol.to_string()));
                }
                None => return Err(BridgeError::NotLoggedIn(protocol.to_string())),
            }
        };

        debug!(parent: &link.span, "logging out");
        let result = link.engine.bridge.logout().await;

        link.shutdown.cancel();
        link.tasks.close();
        link.tasks.wait().await;

        self.server.logout(self.registry.owner());
        self.registry
            .unbind_owner(&link.engine.bridge.get_me().user_id);
        info!(parent: &link.span, "logged out");
        result
    }

    /// Wait for the login backfill of `protocol` to finish.
    pub async fn wait_backfill(&self, protocol: &str) -> BridgeResult<()> {
        let handle = match self.links.lock().get_mut(protocol) {
            Some(Link::Up(link)) => link.backfill.take(),
            _ => return Err(BridgeError::NotLoggedIn(protocol.to_string())),
        };

        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "backfill task failed");
        }
        Ok(())
    }

    // === IRC-originated actions ===

    /// JOIN `#name` or `#team/name`.
    pub async fn join(&self, protocol: &str, channel: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let (id, topic) = engine
            .bridge
            .join(channel.trim_start_matches('#'))
            .await?;

        let name = engine.bridge.get_channel_name(&id);
        engine.sync_channel(&id, &name).await;

        let irc_channel = engine.channel(&id);
        let owner = self.registry.owner();
        if !irc_channel.has_user(owner) {
            irc_channel.join(owner);
            irc_channel.set_topic(Some(&engine.service), &topic);
        }
        Ok(())
    }

    pub async fn part(&self, protocol: &str, channel: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let id = engine.channel_id(channel)?;
        engine.bridge.part(&id).await?;
        engine.channel(&id).part(self.registry.owner(), "");
        Ok(())
    }

    pub async fn topic(&self, protocol: &str, channel: &str, text: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let id = engine.channel_id(channel)?;
        engine.bridge.set_topic(&id, text).await?;
        engine
            .channel(&id)
            .set_topic(Some(self.registry.owner()), text);
        Ok(())
    }

    /// KICK; the part shows up once the backend reports the removal.
    pub async fn kick(&self, protocol: &str, channel: &str, nick: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let id = engine.channel_id(channel)?;
        let user_id = engine.user_id(nick)?;
        engine.bridge.kick(&id, &user_id).await
    }

    pub async fn invite(&self, protocol: &str, nick: &str, channel: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let id = engine.channel_id(channel)?;
        let user_id = engine.user_id(nick)?;
        engine.bridge.invite(&id, &user_id).await
    }

    pub async fn privmsg_channel(
        &self,
        protocol: &str,
        channel: &str,
        text: &str,
    ) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let id = engine.channel_id(channel)?;
        engine.bridge.msg_channel(&id, text).await
    }

    pub async fn privmsg_user(&self, protocol: &str, nick: &str, text: &str) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let user_id = engine.user_id(nick)?;
        engine.bridge.msg_user(&user_id, text).await
    }

    /// AWAY; `None` clears it.
    pub async fn set_away(&self, protocol: &str, message: Option<&str>) -> BridgeResult<()> {
        let engine = self.engine(protocol)?;
        let nick = self.registry.owner().nick();

        match message {
            Some(_) => {
                engine.bridge.set_status("away").await?;
                self.server.encode_numeric(
                    RPL_NOWAWAY,
                    &[nick.as_str()],
                    "You have been marked as being away",
                );
            }
            None => {
                engine.bridge.set_status("online").await?;
                self.server.encode_numeric(
                    RPL_UNAWAY,
                    &[nick.as_str()],
                    "You are no longer marked as being away",
                );
            }
        }
        Ok(())
    }

    /// NICK; the IRC side keeps the client's nick.
    pub async fn nick(&self, protocol: &str, name: &str) -> BridgeResult<()> {
        self.engine(protocol)?.bridge.nick(name).await
    }
}
