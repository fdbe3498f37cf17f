//! Mattermost REST and websocket payloads.
//!
//! Only the fields the bridge reads are modelled; everything defaults so a
//! partially populated payload still decodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub username: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub team_id: String,
    pub header: String,
    #[serde(rename = "type")]
    pub channel_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub parent_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub props: Map<String, Value>,
    pub create_at: i64,
    pub delete_at: i64,
    pub file_ids: Vec<String>,
    pub has_reactions: bool,
}

impl Post {
    /// Thread parent, if this post is a reply.
    pub fn parent(&self) -> Option<&str> {
        [self.root_id.as_str(), self.parent_id.as_str()]
            .into_iter()
            .find(|id| !id.is_empty())
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }
}

/// Posts keyed by id plus their order, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostList {
    pub order: Vec<String>,
    pub posts: HashMap<String, Post>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Broadcast {
    pub user_id: String,
    pub channel_id: String,
    pub team_id: String,
}

/// A raw websocket event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WsEvent {
    pub event: String,
    pub data: Map<String, Value>,
    pub broadcast: Broadcast,
}

impl WsEvent {
    pub const POSTED: &'static str = "posted";
    pub const POST_EDITED: &'static str = "post_edited";
    pub const USER_ADDED: &'static str = "user_added";
    pub const USER_REMOVED: &'static str = "user_removed";
    pub const USER_UPDATED: &'static str = "user_updated";
    pub const CHANNEL_CREATED: &'static str = "channel_created";
    pub const CHANNEL_DELETED: &'static str = "channel_deleted";
    pub const STATUS_CHANGE: &'static str = "status_change";

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub user_id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_post_decodes() {
        let post: Post =
            serde_json::from_str(r#"{"id":"p1","message":"hi","props":{"from_webhook":"true"}}"#)
                .expect("decode");
        assert_eq!(post.id, "p1");
        assert_eq!(post.message, "hi");
        assert_eq!(post.prop_str("from_webhook"), Some("true"));
        assert_eq!(post.parent(), None);
    }

    #[test]
    fn parent_prefers_root_id() {
        let post = Post {
            root_id: "root".into(),
            parent_id: "parent".into(),
            ..Default::default()
        };
        assert_eq!(post.parent(), Some("root"));

        let legacy = Post {
            parent_id: "parent".into(),
            ..Default::default()
        };
        assert_eq!(legacy.parent(), Some("parent"));
    }

    #[test]
    fn ws_event_ignores_empty_strings() {
        let event: WsEvent = serde_json::from_str(
            r#"{"event":"user_removed","data":{"user_id":"","remover_id":"r1"},"broadcast":{"channel_id":"c1"}}"#,
        )
        .expect("decode");
        assert_eq!(event.data_str("user_id"), None);
        assert_eq!(event.data_str("remover_id"), Some("r1"));
        assert_eq!(event.broadcast.channel_id, "c1");
    }
}
