//! Logging setup and span constructors for bridge sessions.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Standardized span constructors for bridge observability.
pub mod spans {
    use tracing::{Span, info_span};

    /// Create a span for one backend login of the IRC owner.
    pub fn session(protocol: &str, owner: &str) -> Span {
        info_span!("bridge", protocol = %protocol, owner = %owner)
    }

    /// Create a span for the login backfill, nested under the session span.
    pub fn backfill(session: &Span) -> Span {
        info_span!(parent: session, "backfill")
    }

    /// Create a span for one backfill worker.
    pub fn backfill_worker(backfill: &Span, worker: usize) -> Span {
        info_span!(parent: backfill, "worker", worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
    }

    #[test]
    fn worker_spans_nest_under_the_session() {
        let session = spans::session("mattermost", "owner");
        let backfill = spans::backfill(&session);
        let _worker = spans::backfill_worker(&backfill, 3);
    }
}
