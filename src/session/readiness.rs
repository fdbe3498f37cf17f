//! One-shot readiness signal.
//!
//! Backfill is spawned before the backend connection exists and parks on a
//! [`Waiter`] until login completes it with the connected engine.

use tokio::sync::watch;

/// Completing half.
pub struct Ready<T> {
    tx: watch::Sender<Option<T>>,
}

/// Waiting half.
pub struct Waiter<T> {
    rx: watch::Receiver<Option<T>>,
}

pub fn channel<T>() -> (Ready<T>, Waiter<T>) {
    let (tx, rx) = watch::channel(None);
    (Ready { tx }, Waiter { rx })
}

impl<T> Ready<T> {
    /// Publish `value`. Only the first completion counts; returns whether
    /// this call was it.
    pub fn complete(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }
}

impl<T: Clone> Waiter<T> {
    /// Wait for completion. `None` when the completing half was dropped
    /// without ever completing.
    pub async fn wait(mut self) -> Option<T> {
        let value = self.rx.wait_for(Option::is_some).await.map(|v| v.clone());
        value.ok().flatten()
    }
}
