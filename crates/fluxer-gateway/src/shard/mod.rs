//! Shards
//!
//! A shard is one gateway socket serving the guilds whose id maps to it.

mod backoff;
mod connection;
mod heartbeat;
mod reconnect;
mod session;
mod state;

pub use backoff::ReconnectBackoff;
pub use connection::ShardConnection;
pub use reconnect::{classify, CloseEvent, CloseInitiator, DisconnectReason};
pub use session::SessionState;
pub use state::{ConnectionState, ShardDescriptor};
