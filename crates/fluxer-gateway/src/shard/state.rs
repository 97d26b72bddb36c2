//! Shard identity and connection state

use crate::error::{GatewayError, GatewayResult};
use std::fmt;

/// Position of a shard in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardDescriptor {
    shard_id: u32,
    shard_count: u32,
}

impl ShardDescriptor {
    /// Requires `shard_id < shard_count`.
    pub fn new(shard_id: u32, shard_count: u32) -> GatewayResult<Self> {
        if shard_id >= shard_count {
            return Err(GatewayError::InvalidConfig(format!(
                "shard id {shard_id} out of range for {shard_count} shards"
            )));
        }
        Ok(Self {
            shard_id,
            shard_count,
        })
    }

    #[must_use]
    pub const fn shard_id(&self) -> u32 {
        self.shard_id
    }

    #[must_use]
    pub const fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// The `shard` field of Identify
    #[must_use]
    pub const fn as_array(&self) -> [u32; 2] {
        [self.shard_id, self.shard_count]
    }
}

impl fmt::Display for ShardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.shard_id, self.shard_count)
    }
}

/// Lifecycle of a shard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for Hello
    AwaitingHello,
    /// Waiting on the identify gate, or Resume sent
    Identifying,
    /// Identify sent, waiting for READY
    AwaitingReady,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::AwaitingReady => "awaiting_ready",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// No longer running and will not reconnect
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
