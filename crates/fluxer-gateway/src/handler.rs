//! Event sink
//!
//! Shards hand every dispatch and every lifecycle change to an
//! [`EventHandler`]. Calls come from the shard's read loop, one at a time and
//! in arrival order, so a slow handler slows down only its own shard.

use crate::error::FatalError;
use crate::events::DispatchEvent;
use crate::shard::DisconnectReason;
use async_trait::async_trait;
use std::time::Duration;

/// Lifecycle notifications of one shard
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// Opening a socket
    Connecting { shard_id: u32, resume: bool },
    /// READY received after Identify
    Ready { shard_id: u32, session_id: String },
    /// RESUMED received after Resume
    Resumed { shard_id: u32 },
    /// The socket dropped and the shard will try again after `delay`
    Reconnecting {
        shard_id: u32,
        attempt: u32,
        delay: Duration,
        reason: DisconnectReason,
    },
    HeartbeatAck { shard_id: u32, latency: Duration },
    /// The shard stopped for good
    Failed(FatalError),
    /// The shard reached `Closed`; always the last event of a shard
    Closed { shard_id: u32 },
}

impl ShardEvent {
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Connecting { shard_id, .. }
            | Self::Ready { shard_id, .. }
            | Self::Resumed { shard_id }
            | Self::Reconnecting { shard_id, .. }
            | Self::HeartbeatAck { shard_id, .. }
            | Self::Closed { shard_id } => *shard_id,
            Self::Failed(err) => err.shard_id,
        }
    }
}

/// Receives gateway events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called once per dispatch frame, including READY and RESUMED.
    async fn on_dispatch(&self, _event: DispatchEvent) {}

    async fn on_shard_event(&self, _event: ShardEvent) {}
}

/// Handler that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {}
