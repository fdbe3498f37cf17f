//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, BridgeConfig, BackfillConfig)
//! - [`protocol`]: Per-backend configuration namespaced by protocol name (ProtocolConfig)
//! - [`defaults`]: Serde default value functions

pub mod defaults;
mod protocol;
mod types;

pub use protocol::ProtocolConfig;
pub use types::{BackfillConfig, BridgeConfig, Config, ConfigError};
