//! Identity registry.
//!
//! Maps backend user ids to ghosts. Every ghost handed out has already been
//! registered with the IRC server, and creation for one id is serialized
//! through the DashMap entry lock, so concurrent resolvers of the same user
//! always end up with the same `Arc`.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::bridge::UserInfo;
use crate::irc::{Ghost, GhostRef, IrcServer};

/// Synthetic id of the owner ghost.
pub const OWNER_ID: &str = "owner";

/// Manages ghost identities for one IRC session.
///
/// The registry is responsible for:
/// - Creating at most one ghost per backend user id.
/// - Announcing nick changes of existing ghosts.
/// - Folding the owner's backend identities into the owner ghost.
pub struct IdentityRegistry {
    server: Arc<dyn IrcServer>,
    owner: GhostRef,
    owner_ids: DashSet<String>,
    ghosts: DashMap<String, GhostRef>,
}

impl IdentityRegistry {
    /// Create the registry and register the owner ghost under `owner_nick`.
    pub fn new(server: Arc<dyn IrcServer>, owner_nick: &str) -> Self {
        let owner = Arc::new(Ghost::new(
            OWNER_ID,
            UserInfo {
                nick: owner_nick.to_string(),
                user_id: OWNER_ID.to_string(),
                username: owner_nick.to_string(),
                host: "localhost".to_string(),
                me: true,
                ..Default::default()
            },
        ));
        server.add(owner.clone());

        Self {
            server,
            owner,
            owner_ids: DashSet::new(),
            ghosts: DashMap::new(),
        }
    }

    pub fn owner(&self) -> &GhostRef {
        &self.owner
    }

    /// Record the owner's backend identity after a login.
    pub fn bind_owner(&self, info: &UserInfo) {
        debug!(user = %info.user_id, "binding owner identity");
        self.owner_ids.insert(info.user_id.clone());
    }

    pub fn unbind_owner(&self, user_id: &str) {
        self.owner_ids.remove(user_id);
    }

    pub fn is_owner(&self, info: &UserInfo) -> bool {
        info.me || self.owner_ids.contains(&info.user_id)
    }

    /// Existing ghost for a backend id.
    pub fn get(&self, user_id: &str) -> Option<GhostRef> {
        if self.owner_ids.contains(user_id) {
            return Some(self.owner.clone());
        }
        self.ghosts.get(user_id).map(|g| g.value().clone())
    }

    /// Number of ghosts, owner excluded.
    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    /// Ghost for `info`, created and registered with the server if needed.
    pub fn resolve(&self, info: &UserInfo) -> GhostRef {
        if self.is_owner(info) {
            return self.owner.clone();
        }

        match self.ghosts.entry(info.user_id.clone()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => e.insert(self.create(info)).value().clone(),
        }
    }

    /// Like [`resolve`](Self::resolve), but an existing ghost takes the new
    /// profile, announcing a nick change first when the nick differs.
    pub fn refresh(&self, info: &UserInfo) -> GhostRef {
        if self.is_owner(info) {
            return self.owner.clone();
        }

        match self.ghosts.entry(info.user_id.clone()) {
            Entry::Occupied(e) => {
                let ghost = e.get().clone();
                let old = ghost.nick();
                if old != info.nick {
                    debug!(user = %info.user_id, old = %old, new = %info.nick, "nick change");
                    self.server.rename(&ghost, &info.nick);
                }
                ghost.replace(info.clone());
                ghost
            }
            Entry::Vacant(e) => e.insert(self.create(info)).value().clone(),
        }
    }

    /// Batch form of [`resolve`](Self::resolve); the owner is skipped.
    pub fn resolve_many(&self, infos: &[UserInfo]) -> Vec<GhostRef> {
        infos
            .iter()
            .filter(|info| !self.is_owner(info))
            .map(|info| self.resolve(info))
            .collect()
    }

    fn create(&self, info: &UserInfo) -> GhostRef {
        trace!(user = %info.user_id, nick = %info.nick, "creating ghost");
        let ghost = Arc::new(Ghost::new(info.user_id.clone(), info.clone()));
        self.server.add(ghost.clone());
        ghost
    }
}
