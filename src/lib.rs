//! slircd-bridge - Straylight IRC bridge
//!
//! Projects a team-chat backend as a virtual IRC server for a single IRC
//! client: backend users become ghost nicks, backend channels become IRC
//! channels, posts become PRIVMSG/NOTICE traffic.

pub mod bridge;
pub mod config;
pub mod error;
pub mod irc;
pub mod session;
pub mod telemetry;

pub use config::Config;
pub use error::{BridgeError, BridgeResult};
pub use session::{Engine, Session};
