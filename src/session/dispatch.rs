//! Event dispatcher.
//!
//! One consumer per login drains the adapter's event channel in order. A
//! failing handler is logged; it never stops the loop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Engine;
use crate::bridge::{
    ChannelKind, ChannelMessageEvent, DirectMessageEvent, Event, FileEvent, MessageKind, UserInfo,
};
use crate::error::BridgeResult;

pub(crate) async fn run(
    engine: Arc<Engine>,
    mut events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stopping event dispatcher");
                return;
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            debug!("event channel closed");
            return;
        };

        let name = event.name();
        trace!(event = name, "dispatching");
        if let Err(e) = engine.handle_event(event).await {
            warn!(event = name, code = e.error_code(), error = %e, "event handler failed");
        }
    }
}

impl Engine {
    pub(crate) async fn handle_event(&self, event: Event) -> BridgeResult<()> {
        match event {
            Event::ChannelMessage(e) => self.on_channel_message(e).await,
            Event::DirectMessage(e) => self.on_direct_message(e),
            Event::ChannelTopic(e) => self.on_topic(e),
            Event::FileShared(e) => self.on_file(e).await,
            Event::MemberAdded(e) => self.on_member_added(e).await?,
            Event::MemberRemoved(e) => self.on_member_removed(e).await?,
            Event::ChannelCreated { channel_id } => self.on_channel_created(&channel_id).await?,
            Event::ChannelDeleted { channel_id } => self.on_channel_deleted(&channel_id),
            Event::UserUpdated(info) => self.on_user_updated(info),
            Event::StatusChanged(e) => self.on_status_changed(e),
        }
        Ok(())
    }

    /// Nick a line from `sender` is shown under.
    fn display_nick(&self, sender: &UserInfo) -> String {
        if self.registry.is_owner(sender) {
            self.registry.owner().nick()
        } else {
            sender.nick.clone()
        }
    }

    /// Target of a private message addressed to `receiver`.
    fn private_target(&self, receiver: &UserInfo) -> String {
        self.display_nick(receiver)
    }

    async fn on_channel_message(&self, event: ChannelMessageEvent) {
        let route = self
            .route(&event.channel_id, event.channel_kind, &event.sender)
            .await;
        let nick = route.display_nick(&self.display_nick(&event.sender), event.channel_kind);

        match event.kind {
            MessageKind::Notice => route.channel.spoof_notice(&nick, &event.text),
            MessageKind::Message => route.channel.spoof_message(&nick, &event.text),
        }
    }

    fn on_direct_message(&self, event: DirectMessageEvent) {
        let sender = self.registry.resolve(&event.sender);
        let target = self.private_target(&event.receiver);
        self.server.spoof_private(&sender, &target, &event.text);
    }

    async fn on_file(&self, event: FileEvent) {
        let route = self
            .route(&event.channel_id, event.channel_kind, &event.sender)
            .await;

        if event.channel_kind == ChannelKind::Direct {
            let sender = self.registry.resolve(&event.sender);
            let target = self.private_target(&event.receiver);
            for file in &event.files {
                self.server
                    .spoof_private(&sender, &target, &format!("download file -{}", file.name));
            }
            return;
        }

        let nick = self.display_nick(&event.sender);
        for file in &event.files {
            route
                .channel
                .spoof_message(&nick, &format!("download file -{}", file.name));
        }
    }
}
