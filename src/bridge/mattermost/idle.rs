//! Anti-idle task.
//!
//! Mattermost marks a user away after a period without activity. Viewing a
//! channel counts as activity, so the bridge views its anti-idle channels
//! periodically for as long as the session lives.

use std::sync::Arc;
use tracing::{debug, warn};

use super::Mattermost;

pub(super) async fn run(mm: Arc<Mattermost>, channel_id: String) {
    let mut ticker = tokio::time::interval(mm.config.anti_idle_interval());
    // The first tick completes immediately.
    ticker.tick().await;

    debug!(channel = %channel_id, "starting anti-idle loop");

    loop {
        tokio::select! {
            _ = mm.shutdown.cancelled() => {
                debug!(channel = %channel_id, "stopping anti-idle loop");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = mm.api.view_channel(&channel_id).await {
                    warn!(channel = %channel_id, error = %e, "anti-idle view failed");
                }
            }
        }
    }
}
