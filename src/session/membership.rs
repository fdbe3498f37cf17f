//! Membership synchronization between backend channels and IRC channels.

use tracing::{debug, warn};

use super::Engine;
use crate::bridge::{
    ChannelAddEvent, ChannelRemoveEvent, ChannelTopicEvent, StatusChangeEvent, UserInfo,
};
use crate::error::BridgeResult;
use crate::irc::{RPL_NOWAWAY, RPL_UNAWAY};

/// Nick membership notices are attributed to.
const SYSTEM_SENDER: &str = "system";

/// Whether a membership change deserves a notice naming the actor.
fn announces(actor: Option<&UserInfo>, subject: &UserInfo) -> Option<String> {
    let actor = actor?;
    if actor.nick == subject.nick || actor.is_system() || actor.nick == SYSTEM_SENDER {
        return None;
    }
    Some(actor.nick.clone())
}

impl Engine {
    /// Bring the IRC channel `name` in line with the backend member list of
    /// `channel_id`, joining the owner when policy allows.
    pub(crate) async fn sync_channel(&self, channel_id: &str, name: &str) {
        let users = match self.bridge.get_channel_users(channel_id).await {
            Ok(users) => users,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "unable to fetch channel members");
                return;
            }
        };

        let ghosts = self.registry.resolve_many(&users);
        debug!(channel = %name, members = ghosts.len(), "syncing channel");
        self.users_channel().batch_join(&ghosts);

        let channel = self.server.channel(channel_id, name);
        channel.batch_join(&ghosts);

        let owner = self.registry.owner();
        if !channel.has_user(owner) && self.policy.may_join(&channel.name()) {
            debug!(channel = %name, "joining owner");
            channel.join(owner);
            let topic = self.bridge.topic(channel_id).await;
            channel.set_topic(Some(&self.service), &topic);
        }
    }

    pub(crate) async fn on_member_added(&self, event: ChannelAddEvent) -> BridgeResult<()> {
        let channel = self.channel(&event.channel_id);

        for added in &event.added {
            if self.registry.is_owner(added) {
                self.sync_channel(&event.channel_id, &channel.name()).await;
                continue;
            }

            let ghost = self.registry.resolve(added);
            channel.join(&ghost);

            if let Some(adder) = announces(event.adder.as_ref(), added) {
                channel.spoof_message(
                    SYSTEM_SENDER,
                    &format!("added {} to the channel by {}", added.nick, adder),
                );
            }
        }
        Ok(())
    }

    pub(crate) async fn on_member_removed(&self, event: ChannelRemoveEvent) -> BridgeResult<()> {
        let channel = self.channel(&event.channel_id);

        for removed in &event.removed {
            if self.registry.is_owner(removed) {
                channel.part(self.registry.owner(), "");
                continue;
            }

            let ghost = self.registry.resolve(removed);
            channel.part(&ghost, "");

            if let Some(remover) = announces(event.remover.as_ref(), removed) {
                channel.spoof_message(
                    SYSTEM_SENDER,
                    &format!("removed {} from the channel by {}", removed.nick, remover),
                );
            }
        }
        Ok(())
    }

    pub(crate) async fn on_channel_created(&self, channel_id: &str) -> BridgeResult<()> {
        self.bridge.update_channels().await?;
        let name = self.bridge.get_channel_name(channel_id);
        debug!(channel = %name, id = %channel_id, "channel created, adding owner");
        self.sync_channel(channel_id, &name).await;
        Ok(())
    }

    pub(crate) fn on_channel_deleted(&self, channel_id: &str) {
        let channel = self.channel(channel_id);
        debug!(channel = %channel.name(), id = %channel_id, "channel deleted, removing owner");
        channel.part(self.registry.owner(), "");
    }

    pub(crate) fn on_topic(&self, event: ChannelTopicEvent) {
        let setter = self.server.lookup_by_nick(&event.sender);
        self.channel(&event.channel_id)
            .set_topic(setter.as_ref(), &event.text);
    }

    pub(crate) fn on_user_updated(&self, info: UserInfo) {
        self.registry.refresh(&info);
    }

    pub(crate) fn on_status_changed(&self, event: StatusChangeEvent) {
        if event.user_id != self.bridge.get_me().user_id {
            return;
        }

        let nick = self.registry.owner().nick();
        if event.status == "online" {
            debug!("owner back online");
            self.server.encode_numeric(
                RPL_UNAWAY,
                &[nick.as_str()],
                "You are no longer marked as being away",
            );
        } else {
            debug!(status = %event.status, "owner away");
            self.server.encode_numeric(
                RPL_NOWAWAY,
                &[nick.as_str()],
                "You have been marked as being away",
            );
        }
    }
}
