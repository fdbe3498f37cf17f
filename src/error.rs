//! Unified error handling for slircd-bridge.
//!
//! This module provides the error hierarchy for the session engine. Transport
//! failures from backend ports arrive as [`ApiError`] and are wrapped into
//! [`BridgeError`] with automatic conversions.

use thiserror::Error;

pub use crate::bridge::mattermost::ApiError;
pub use crate::config::ConfigError;

// ============================================================================
// Bridge Errors (session engine)
// ============================================================================

/// Errors surfaced by the session engine and backend adapters.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("server {server} is not allowed for {protocol}")]
    RestrictedServer { protocol: String, server: String },

    #[error("already logged in to {0}")]
    AlreadyLoggedIn(String),

    #[error("not logged in to {0}")]
    NotLoggedIn(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("cannot join channel (+i): {0}")]
    CannotJoin(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("event channel closed")]
    EventChannelClosed,

    #[error("backend error: {0}")]
    Api(#[from] ApiError),
}

impl BridgeError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownProtocol(_) => "unknown_protocol",
            Self::RestrictedServer { .. } => "restricted_server",
            Self::AlreadyLoggedIn(_) => "already_logged_in",
            Self::NotLoggedIn(_) => "not_logged_in",
            Self::Login(_) => "login_failed",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::CannotJoin(_) => "cannot_join",
            Self::MalformedEvent(_) => "malformed_event",
            Self::EventChannelClosed => "event_channel_closed",
            Self::Api(_) => "backend_error",
        }
    }

    /// Whether the error is local to one event or channel and the caller
    /// should carry on with the next one.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EventChannelClosed)
    }
}

/// Result type for engine operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
