//! In-memory virtual IRC server.
//!
//! Keeps ghost and channel membership tables in DashMaps and reports every
//! client-visible change as an [`Outbound`] record on an unbounded channel.
//! A connection layer turns those into wire messages; tests read them
//! directly.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Ghost, GhostRef, IrcChannel, IrcServer, irc_to_lower};

/// Something the connected client gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Join {
        channel: String,
        nick: String,
    },
    Part {
        channel: String,
        nick: String,
        reason: String,
    },
    Topic {
        channel: String,
        setter: Option<String>,
        text: String,
    },
    Privmsg {
        from: String,
        target: String,
        text: String,
    },
    Notice {
        from: String,
        target: String,
        text: String,
    },
    Nick {
        old: String,
        new: String,
    },
    Numeric {
        code: u16,
        params: Vec<String>,
        trailing: String,
    },
}

type OutboundTx = mpsc::UnboundedSender<Outbound>;

fn send(out: &OutboundTx, msg: Outbound) {
    // The client going away is the connection layer's problem.
    let _ = out.send(msg);
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(str::trim).filter(|l| !l.is_empty())
}

/// One channel of the virtual server.
pub struct VirtualChannel {
    id: String,
    name: String,
    members: DashMap<String, GhostRef>,
    topic: RwLock<String>,
    out: OutboundTx,
}

impl VirtualChannel {
    fn new(id: &str, name: &str, out: OutboundTx) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            members: DashMap::new(),
            topic: RwLock::new(String::new()),
            out,
        }
    }

    fn insert(&self, ghost: &GhostRef) -> bool {
        self.members
            .insert(ghost.id().to_string(), ghost.clone())
            .is_none()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl IrcChannel for VirtualChannel {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn join(&self, ghost: &GhostRef) {
        if self.insert(ghost) {
            send(
                &self.out,
                Outbound::Join {
                    channel: self.name.clone(),
                    nick: ghost.nick(),
                },
            );
        }
    }

    fn batch_join(&self, ghosts: &[GhostRef]) {
        for ghost in ghosts {
            self.join(ghost);
        }
    }

    fn part(&self, ghost: &GhostRef, reason: &str) {
        if self.members.remove(ghost.id()).is_some() {
            send(
                &self.out,
                Outbound::Part {
                    channel: self.name.clone(),
                    nick: ghost.nick(),
                    reason: reason.to_string(),
                },
            );
        }
    }

    fn has_user(&self, ghost: &Ghost) -> bool {
        self.members.contains_key(ghost.id())
    }

    fn members(&self) -> Vec<GhostRef> {
        self.members.iter().map(|m| m.value().clone()).collect()
    }

    fn topic(&self) -> String {
        self.topic.read().clone()
    }

    fn set_topic(&self, by: Option<&GhostRef>, text: &str) {
        *self.topic.write() = text.to_string();
        send(
            &self.out,
            Outbound::Topic {
                channel: self.name.clone(),
                setter: by.map(|g| g.nick()),
                text: text.to_string(),
            },
        );
    }

    fn spoof_message(&self, nick: &str, text: &str) {
        for line in lines(text) {
            send(
                &self.out,
                Outbound::Privmsg {
                    from: nick.to_string(),
                    target: self.name.clone(),
                    text: line.to_string(),
                },
            );
        }
    }

    fn spoof_notice(&self, nick: &str, text: &str) {
        for line in lines(text) {
            send(
                &self.out,
                Outbound::Notice {
                    from: nick.to_string(),
                    target: self.name.clone(),
                    text: line.to_string(),
                },
            );
        }
    }
}

/// In-memory implementation of the server ports.
pub struct VirtualServer {
    users: DashMap<String, GhostRef>,
    nicks: DashMap<String, String>,
    channels: DashMap<String, Arc<VirtualChannel>>,
    out: OutboundTx,
}

impl VirtualServer {
    /// Create a server and the receiving end of its client stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (out, rx) = mpsc::unbounded_channel();
        let server = Arc::new(Self {
            users: DashMap::new(),
            nicks: DashMap::new(),
            channels: DashMap::new(),
            out,
        });
        (server, rx)
    }

    /// Channel by backend id, if it was ever used.
    pub fn get_channel(&self, id: &str) -> Option<Arc<VirtualChannel>> {
        self.channels.get(id).map(|c| c.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl IrcServer for VirtualServer {
    fn channel(&self, id: &str, name: &str) -> Arc<dyn IrcChannel> {
        self.channels
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(VirtualChannel::new(id, name, self.out.clone())))
            .value()
            .clone()
    }

    fn add(&self, ghost: GhostRef) {
        self.nicks
            .insert(irc_to_lower(&ghost.nick()), ghost.id().to_string());
        self.users.insert(ghost.id().to_string(), ghost);
    }

    fn batch_add(&self, ghosts: &[GhostRef]) {
        for ghost in ghosts {
            self.add(ghost.clone());
        }
    }

    fn lookup_by_id(&self, id: &str) -> Option<GhostRef> {
        self.users.get(id).map(|g| g.value().clone())
    }

    fn lookup_by_nick(&self, nick: &str) -> Option<GhostRef> {
        let id = self.nicks.get(&irc_to_lower(nick))?.value().clone();
        self.lookup_by_id(&id)
    }

    fn rename(&self, ghost: &GhostRef, new_nick: &str) {
        let old = ghost.nick();
        let old_lower = irc_to_lower(&old);
        self.nicks
            .remove_if(&old_lower, |_, id| id.as_str() == ghost.id());
        self.nicks
            .insert(irc_to_lower(new_nick), ghost.id().to_string());
        send(
            &self.out,
            Outbound::Nick {
                old,
                new: new_nick.to_string(),
            },
        );
    }

    fn encode_numeric(&self, code: u16, params: &[&str], trailing: &str) {
        send(
            &self.out,
            Outbound::Numeric {
                code,
                params: params.iter().map(|p| p.to_string()).collect(),
                trailing: trailing.to_string(),
            },
        );
    }

    fn spoof_private(&self, sender: &Ghost, target: &str, text: &str) {
        let from = sender.nick();
        for line in lines(text) {
            send(
                &self.out,
                Outbound::Privmsg {
                    from: from.clone(),
                    target: target.to_string(),
                    text: line.to_string(),
                },
            );
        }
    }

    fn logout(&self, owner: &GhostRef) {
        let channels: Vec<Arc<VirtualChannel>> =
            self.channels.iter().map(|c| c.value().clone()).collect();
        for channel in channels {
            channel.part(owner, "logout");
        }
    }
}
