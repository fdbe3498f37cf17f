//! Login backfill.
//!
//! After login every ghost is projected into `&users`, then a pool of workers
//! walks the backend channel list, syncs membership and replays what the
//! owner has not seen yet. Workers share one bounded queue and one throttle
//! interval; replay within a channel is strictly chronological.

use chrono::{Local, TimeZone};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, trace};

use super::Engine;
use super::readiness::Waiter;
use crate::bridge::{ChannelInfo, Post, PostType};
use crate::irc::{GhostRef, IrcChannel, IrcServer};
use crate::telemetry::spans;

/// One line of channel history, ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayLine {
    /// Start of a new calendar day, `Replaying since YYYY-MM-DD`.
    DayMarker(String),
    Message { user_id: String, text: String },
}

/// Turn backend history (newest first) into replay lines, oldest first.
///
/// Membership notices and soft-deleted posts are skipped. Every message line
/// is stamped `[HH:MM]` in `tz`, and a day marker precedes the first line of
/// each calendar date.
pub fn replay_lines<Tz>(posts: &[Post], tz: &Tz) -> Vec<ReplayLine>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut lines = Vec::new();
    let mut prev_date = String::new();

    for post in posts.iter().rev() {
        if post.post_type == PostType::Membership || post.is_soft_deleted() {
            continue;
        }
        let Some(ts) = tz.timestamp_millis_opt(post.create_at).single() else {
            continue;
        };
        let date = ts.format("%Y-%m-%d").to_string();
        let time = ts.format("%H:%M").to_string();

        for text in post.message.split('\n').filter(|l| !l.trim().is_empty()) {
            if date != prev_date {
                lines.push(ReplayLine::DayMarker(format!("Replaying since {date}")));
                prev_date = date.clone();
            }
            lines.push(ReplayLine::Message {
                user_id: post.user_id.clone(),
                text: format!("[{time}] {text}"),
            });
        }
    }

    lines
}

/// Where replayed lines of one backend channel go.
enum Emitter {
    Channel(Arc<dyn IrcChannel>),
    /// Direct chat with `counterpart`, shown as private messages.
    Direct { counterpart: GhostRef },
}

impl Emitter {
    fn emit(&self, server: &dyn IrcServer, owner: &GhostRef, sender: &GhostRef, text: &str) {
        match self {
            Self::Channel(channel) => channel.spoof_message(&sender.nick(), text),
            Self::Direct { counterpart } => {
                let target = if Arc::ptr_eq(sender, owner) {
                    counterpart.nick()
                } else {
                    owner.nick()
                };
                server.spoof_private(sender, &target, text);
            }
        }
    }
}

type Queue = Arc<Mutex<mpsc::Receiver<ChannelInfo>>>;
type Throttle = Arc<Mutex<Interval>>;

/// Backfill task of one login: waits for the engine, then replays.
pub(crate) async fn run(
    ready: Waiter<Arc<Engine>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    let engine = tokio::select! {
        _ = cancel.cancelled() => return,
        engine = ready.wait() => match engine {
            Some(engine) => engine,
            None => {
                debug!("login never completed, skipping backfill");
                return;
            }
        },
    };

    engine.backfill(cancel, tasks).await;
}

impl Engine {
    async fn backfill(self: &Arc<Self>, cancel: CancellationToken, tasks: TaskTracker) {
        let owner = self.registry.owner().clone();

        let ghosts = self.registry.resolve_many(&self.bridge.get_users());
        debug!(users = ghosts.len(), "adding users");
        let users = self.users_channel();
        users.batch_join(&ghosts);
        users.join(&owner);
        self.overflow_channel().join(&owner);

        let cfg = &self.backfill_cfg;
        let (tx, rx) = mpsc::channel(cfg.queue_depth.max(1));
        let queue: Queue = Arc::new(Mutex::new(rx));
        let mut interval = tokio::time::interval(cfg.throttle());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let throttle: Throttle = Arc::new(Mutex::new(interval));

        let span = tracing::Span::current();
        let workers: Vec<_> = (0..cfg.workers.max(1))
            .map(|n| {
                let worker = self
                    .clone()
                    .backfill_worker(queue.clone(), throttle.clone(), cancel.clone());
                tasks.spawn(worker.instrument(spans::backfill_worker(&span, n)))
            })
            .collect();

        let channels = self.bridge.get_channels();
        let total = channels.len();
        for channel in channels {
            trace!(channel = %channel.name, "queueing channel");
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("backfill cancelled");
                    break;
                }
                sent = tx.send(channel) => if sent.is_err() {
                    break;
                },
            }
        }
        drop(tx);

        join_all(workers).await;
        info!(channels = total, "backfill finished");
    }

    async fn backfill_worker(
        self: Arc<Self>,
        queue: Queue,
        throttle: Throttle,
        cancel: CancellationToken,
    ) {
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    channel = queue.recv() => channel,
                }
            };
            let Some(channel) = next else {
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = async { throttle.lock().await.tick().await } => {}
            }

            self.replay_channel(&channel).await;
        }
    }

    async fn replay_channel(&self, channel: &ChannelInfo) {
        let since = self.bridge.get_last_viewed(&channel.id).await;
        if since == 0 {
            trace!(channel = %channel.name, "never viewed, skipping");
            return;
        }

        let Some(emitter) = self.emitter(channel).await else {
            debug!(channel = %channel.name, "no counterpart for direct channel");
            return;
        };

        let me = self.bridge.get_me();
        let Some(posts) = self.bridge.get_posts_since(&channel.id, since).await else {
            if channel.team_id == me.team_id {
                error!(channel = %channel.name, id = %channel.id, "unable to fetch posts");
            } else {
                debug!(channel = %channel.name, id = %channel.id, "no posts for channel outside the primary team");
            }
            return;
        };

        let owner = self.registry.owner();
        let mut senders: HashMap<String, GhostRef> = HashMap::new();
        for line in replay_lines(&posts, &Local) {
            match line {
                ReplayLine::DayMarker(text) => {
                    emitter.emit(&*self.server, owner, &self.announcer, &text);
                }
                ReplayLine::Message { user_id, text } => {
                    let sender = match senders.get(&user_id) {
                        Some(ghost) => ghost.clone(),
                        None => {
                            let info = self.bridge.get_user(&user_id).await;
                            let ghost = self.registry.resolve(&info);
                            senders.insert(user_id, ghost.clone());
                            ghost
                        }
                    };
                    emitter.emit(&*self.server, owner, &sender, &text);
                }
            }
        }

        if !self.protocol_cfg.disable_auto_view {
            self.bridge.update_last_viewed(&channel.id).await;
        }
    }

    async fn emitter(&self, channel: &ChannelInfo) -> Option<Emitter> {
        let me = self.bridge.get_me();

        if channel.is_direct() {
            let other = channel.direct_counterpart(&me.user_id)?;
            let info = self.bridge.get_user(other).await;
            return Some(Emitter::Direct {
                counterpart: self.registry.resolve(&info),
            });
        }

        let name = self.bridge.get_channel_name(&channel.id);
        self.sync_channel(&channel.id, &name).await;
        Some(Emitter::Channel(self.server.channel(&channel.id, &name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    // 2024-03-01 23:50:00 UTC
    const LATE: i64 = 1_709_337_000_000;
    const MINUTE: i64 = 60_000;

    fn post(id: &str, message: &str, create_at: i64) -> Post {
        Post {
            id: id.into(),
            user_id: format!("user-{id}"),
            message: message.into(),
            post_type: PostType::Regular,
            create_at,
            delete_at: 0,
        }
    }

    fn texts(lines: &[ReplayLine]) -> Vec<String> {
        lines
            .iter()
            .map(|l| match l {
                ReplayLine::DayMarker(t) => t.clone(),
                ReplayLine::Message { text, .. } => text.clone(),
            })
            .collect()
    }

    #[test]
    fn replays_oldest_first() {
        // newest first, as the backend returns them
        let posts = vec![
            post("b", "second", LATE + MINUTE),
            post("a", "first", LATE),
        ];
        assert_eq!(
            texts(&replay_lines(&posts, &Utc)),
            vec!["Replaying since 2024-03-01", "[23:50] first", "[23:51] second"]
        );
    }

    #[test]
    fn one_marker_per_date_change() {
        let posts = vec![
            post("c", "tomorrow too", LATE + 20 * MINUTE),
            post("b", "tomorrow", LATE + 15 * MINUTE),
            post("a", "today", LATE),
        ];
        let lines = replay_lines(&posts, &Utc);
        let markers: Vec<_> = lines
            .iter()
            .filter(|l| matches!(l, ReplayLine::DayMarker(_)))
            .collect();
        assert_eq!(markers.len(), 2);
        assert_eq!(
            lines[2],
            ReplayLine::DayMarker("Replaying since 2024-03-02".into())
        );
    }

    #[test]
    fn skips_deleted_and_membership_posts() {
        let mut deleted = post("d", "gone", LATE + 2 * MINUTE);
        deleted.delete_at = LATE + 3 * MINUTE;
        let mut joined = post("j", "alice joined", LATE + MINUTE);
        joined.post_type = PostType::Membership;
        let posts = vec![deleted, joined, post("a", "kept", LATE)];

        assert_eq!(
            texts(&replay_lines(&posts, &Utc)),
            vec!["Replaying since 2024-03-01", "[23:50] kept"]
        );
    }

    #[test]
    fn multi_line_posts_share_a_timestamp() {
        let posts = vec![post("a", "one\n\ntwo", LATE)];
        let lines = replay_lines(&posts, &Utc);
        assert_eq!(
            lines[1..],
            [
                ReplayLine::Message {
                    user_id: "user-a".into(),
                    text: "[23:50] one".into()
                },
                ReplayLine::Message {
                    user_id: "user-a".into(),
                    text: "[23:50] two".into()
                },
            ]
        );
    }
}
