//! Websocket consumption loop and event normalization.
//!
//! Every raw [`WsEvent`] is decoded into zero or more [`Event`]s. Decoding
//! failures are logged and the event is dropped; only a closed event channel
//! or session shutdown ends the loop.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::Mattermost;
use super::model::{Post, Status, User, WsEvent};
use super::nick;
use crate::bridge::{
    Bridger, ChannelAddEvent, ChannelKind, ChannelMessageEvent, ChannelRemoveEvent,
    ChannelTopicEvent, DirectMessageEvent, Event, FileEvent, MessageKind, PostType,
    StatusChangeEvent, UserInfo,
};
use crate::error::{BridgeError, BridgeResult};

/// Mentions that address the whole channel.
const BROADCAST_MENTIONS: [&str; 3] = ["@channel", "@here", "@all"];

pub(super) async fn run(mm: Arc<Mattermost>, mut ws: mpsc::Receiver<WsEvent>) {
    loop {
        let raw = tokio::select! {
            _ = mm.shutdown.cancelled() => {
                debug!("stopping websocket loop");
                return;
            }
            raw = ws.recv() => raw,
        };

        let Some(raw) = raw else {
            info!("websocket closed");
            return;
        };

        trace!(event = %raw.event, "websocket event");
        mm.check_channel_cache(&raw);

        match mm.handle_ws_event(&raw).await {
            Ok(()) => {}
            Err(e) if !e.is_recoverable() => {
                debug!(error = %e, "stopping websocket loop");
                return;
            }
            Err(e) => {
                warn!(
                    event = %raw.event,
                    code = e.error_code(),
                    error = %e,
                    "dropping websocket event"
                );
            }
        }
    }
}

fn malformed(what: &str) -> BridgeError {
    BridgeError::MalformedEvent(what.to_string())
}

impl Mattermost {
    /// Refresh the channel list when an event references an unknown channel.
    fn check_channel_cache(self: &Arc<Self>, raw: &WsEvent) {
        let channel_id = &raw.broadcast.channel_id;
        if channel_id.is_empty() || self.channels.contains_key(channel_id) {
            return;
        }
        debug!(channel = %channel_id, "event for unknown channel");
        self.request_refresh();
    }

    pub(super) async fn handle_ws_event(self: &Arc<Self>, raw: &WsEvent) -> BridgeResult<()> {
        match raw.event.as_str() {
            WsEvent::POSTED | WsEvent::POST_EDITED => self.handle_post(raw).await,
            WsEvent::USER_ADDED => self.handle_user_added(raw).await,
            WsEvent::USER_REMOVED => self.handle_user_removed(raw).await,
            WsEvent::USER_UPDATED => self.handle_user_updated(raw).await,
            WsEvent::CHANNEL_CREATED => {
                let channel_id = raw
                    .data_str("channel_id")
                    .ok_or_else(|| malformed("channel_created without channel_id"))?;
                self.emit(Event::ChannelCreated {
                    channel_id: channel_id.to_string(),
                })
                .await
            }
            WsEvent::CHANNEL_DELETED => {
                let channel_id = raw
                    .data_str("channel_id")
                    .ok_or_else(|| malformed("channel_deleted without channel_id"))?;
                self.emit(Event::ChannelDeleted {
                    channel_id: channel_id.to_string(),
                })
                .await
            }
            WsEvent::STATUS_CHANGE => {
                let status: Status = serde_json::from_value(Value::Object(raw.data.clone()))
                    .map_err(|e| malformed(&format!("undecodable status: {e}")))?;
                self.emit(Event::StatusChanged(StatusChangeEvent {
                    user_id: status.user_id,
                    status: status.status,
                }))
                .await
            }
            _ => Ok(()),
        }
    }

    /// Posts we must not relay: our own echoes, our own join/leave noise, and
    /// edits of posts that carry reactions (a reaction change arrives as an
    /// edit, indistinguishable from a text edit).
    fn skip_post(&self, post: &Post, edited: bool) -> bool {
        if edited && post.has_reactions {
            debug!(post = %post.id, "edited post with reactions, not relaying");
            return true;
        }

        if post.user_id == self.me.id {
            if post
                .props
                .get(&self.echo_marker())
                .is_some_and(Value::is_boolean)
            {
                debug!(post = %post.id, "post sent through the bridge, not relaying");
                return true;
            }

            if matches!(
                post.post_type.as_str(),
                "system_join_leave" | "system_join_channel"
            ) {
                debug!(post = %post.id, "own join/leave message, not relaying");
                return true;
            }
        }

        false
    }

    async fn handle_post(self: &Arc<Self>, raw: &WsEvent) -> BridgeResult<()> {
        let json = raw
            .data_str("post")
            .ok_or_else(|| malformed("post event without post"))?;
        let mut post: Post = serde_json::from_str(json)
            .map_err(|e| malformed(&format!("undecodable post: {e}")))?;
        let edited = raw.event == WsEvent::POST_EDITED;

        if self.skip_post(&post, edited) {
            return Ok(());
        }

        if let Some(parent_id) = post.parent().map(str::to_string) {
            match self.api.get_post(&parent_id).await {
                Ok(parent) => {
                    let parent_nick = self.get_user(&parent.user_id).await.nick;
                    post.message = if self.config.hide_replies {
                        format!("{} (re @{})", post.message, parent_nick)
                    } else {
                        format!("{} (re @{}: {})", post.message, parent_nick, parent.message)
                    };
                }
                Err(e) => warn!(post = %post.id, error = %e, "unable to get parent post"),
            }
        }

        let mut ghost = if post.user_id == self.me.id {
            self.get_me()
        } else {
            self.get_user(&post.user_id).await
        };

        if let Some(Value::Array(attachments)) = post.props.get("attachments") {
            let fallbacks: Vec<String> = attachments
                .iter()
                .filter_map(|a| a.get("fallback").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            for fallback in fallbacks {
                post.message.push('\n');
                post.message.push_str(&fallback);
            }
        }

        if let Some(name) = post.prop_str("override_username")
            && !name.is_empty()
            && nick::is_valid_override(name)
        {
            ghost.nick = name.to_string();
        }

        match PostType::from_type(&post.post_type) {
            PostType::Membership => {
                debug!(post = %post.id, "join/leave message, not relaying");
                if self.channels.contains_key(&post.channel_id) {
                    self.request_refresh();
                } else {
                    self.ensure_channel(&post.channel_id).await;
                }
                return self.post_join_leave(&post).await;
            }
            PostType::HeaderChange => {
                if let (Some(topic), Some(user)) =
                    (post.prop_str("new_header"), post.prop_str("username"))
                {
                    self.emit(Event::ChannelTopic(ChannelTopicEvent {
                        text: topic.to_string(),
                        channel_id: post.channel_id.clone(),
                        sender: user.to_string(),
                    }))
                    .await?;
                }
            }
            PostType::Regular | PostType::System(_) => {}
        }

        let mut channel_kind = ChannelKind::from_tag(raw.data_str("channel_type").unwrap_or(""));
        let mut lines: Vec<String> = post.message.split('\n').map(str::to_string).collect();

        if edited {
            if let Some(last) = lines.last_mut() {
                last.push_str(" (edited)");
            }
            if self
                .channels
                .get(&post.channel_id)
                .is_some_and(|c| c.name.contains("__"))
            {
                channel_kind = ChannelKind::Direct;
            }
        }

        let kind = if BROADCAST_MENTIONS.iter().any(|m| post.message.contains(m)) {
            MessageKind::Notice
        } else {
            MessageKind::Message
        };

        for line in lines.into_iter().filter(|l| !l.is_empty()) {
            let event = if channel_kind == ChannelKind::Direct {
                Event::DirectMessage(DirectMessageEvent {
                    text: line,
                    sender: ghost.clone(),
                    receiver: self.get_me(),
                })
            } else {
                Event::ChannelMessage(ChannelMessageEvent {
                    text: line,
                    channel_id: post.channel_id.clone(),
                    sender: ghost.clone(),
                    kind,
                    channel_kind,
                })
            };
            self.emit(event).await?;
        }

        let files = self.file_links(&post.file_ids).await;
        if !files.is_empty() {
            let receiver = if channel_kind == ChannelKind::Direct {
                self.get_me()
            } else {
                ghost.clone()
            };
            self.emit(Event::FileShared(FileEvent {
                sender: ghost,
                receiver,
                channel_id: post.channel_id.clone(),
                channel_kind,
                files,
            }))
            .await?;
        }

        if !self.config.disable_auto_view {
            self.update_last_viewed(&post.channel_id).await;
        }

        Ok(())
    }

    async fn post_join_leave(&self, post: &Post) -> BridgeResult<()> {
        match post.post_type.as_str() {
            "system_add_to_channel" => {
                let (Some(added), Some(adder)) =
                    (post.prop_str("addedUsername"), post.prop_str("username"))
                else {
                    return Ok(());
                };
                let Some(added) = self.get_user_by_username(added).await else {
                    return Ok(());
                };
                let adder = self.get_user_by_username(adder).await;
                self.emit(Event::MemberAdded(ChannelAddEvent {
                    adder,
                    added: vec![added],
                    channel_id: post.channel_id.clone(),
                }))
                .await
            }
            "system_remove_from_channel" => {
                let Some(removed) = post.prop_str("removedUsername") else {
                    return Ok(());
                };
                let Some(removed) = self.get_user_by_username(removed).await else {
                    return Ok(());
                };
                self.emit(Event::MemberRemoved(ChannelRemoveEvent {
                    remover: None,
                    removed: vec![removed],
                    channel_id: post.channel_id.clone(),
                }))
                .await
            }
            _ => Ok(()),
        }
    }

    async fn handle_user_added(&self, raw: &WsEvent) -> BridgeResult<()> {
        let user_id = raw
            .data_str("user_id")
            .ok_or_else(|| malformed("user_added without user_id"))?;
        self.ensure_channel(&raw.broadcast.channel_id).await;
        let added = self.get_user(user_id).await;
        self.emit(Event::MemberAdded(ChannelAddEvent {
            adder: Some(UserInfo::system()),
            added: vec![added],
            channel_id: raw.broadcast.channel_id.clone(),
        }))
        .await
    }

    async fn handle_user_removed(&self, raw: &WsEvent) -> BridgeResult<()> {
        let user_id = raw
            .data_str("user_id")
            .unwrap_or(raw.broadcast.user_id.as_str())
            .to_string();
        let remover_id = raw
            .data_str("remover_id")
            .ok_or_else(|| malformed("user_removed without remover_id"))?;
        let channel_id = raw
            .data_str("channel_id")
            .unwrap_or(raw.broadcast.channel_id.as_str())
            .to_string();

        let remover = self.get_user(remover_id).await;
        let removed = self.get_user(&user_id).await;
        self.emit(Event::MemberRemoved(ChannelRemoveEvent {
            remover: Some(remover),
            removed: vec![removed],
            channel_id,
        }))
        .await
    }

    async fn handle_user_updated(&self, raw: &WsEvent) -> BridgeResult<()> {
        let value = raw
            .data
            .get("user")
            .cloned()
            .ok_or_else(|| malformed("user_updated without user"))?;
        let user: User = serde_json::from_value(value)
            .map_err(|e| malformed(&format!("undecodable user: {e}")))?;
        let info = self.create_user(&user);
        self.users.insert(user.id.clone(), user);
        self.emit(Event::UserUpdated(info)).await
    }
}
