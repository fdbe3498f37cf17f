//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Bridge Defaults
// =============================================================================

/// Flat channel every known backend user is joined into.
pub fn default_users_channel() -> String {
    "&users".to_string()
}

/// Channel receiving messages from excluded or unjoined channels.
pub fn default_overflow_channel() -> String {
    "&messages".to_string()
}

/// Nick used for replay markers.
pub fn default_service_nick() -> String {
    "slircd".to_string()
}

pub fn default_event_queue() -> usize {
    256
}

// =============================================================================
// Backfill Defaults
// =============================================================================

pub fn default_backfill_workers() -> usize {
    10
}

pub fn default_backfill_queue_depth() -> usize {
    5
}

pub fn default_backfill_throttle_ms() -> u64 {
    50
}

// =============================================================================
// Protocol Defaults
// =============================================================================

pub fn default_anti_idle_channels() -> Vec<String> {
    vec!["town-square".to_string()]
}

pub fn default_anti_idle_interval_secs() -> u64 {
    60
}

pub fn default_refresh_interval_secs() -> u64 {
    60
}
