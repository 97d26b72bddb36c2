//! Gateway error types

use crate::protocol::{CloseCode, OpCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type for every fallible gateway operation
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The routed shard is not part of this manager
    #[error("Shard {0} is not running")]
    ShardNotRunning(u32),

    /// The shard has no live session to send on
    #[error("Shard is not connected")]
    NotConnected,

    /// The shard is shutting down
    #[error("Connection is closing")]
    Closing,

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Caller tried to send an op code reserved for the connection itself
    #[error("Op code {0} cannot be sent by callers")]
    ForbiddenOpcode(OpCode),

    /// Waiting for the identify gate took too long; the shard retries
    #[error("Identify gate timed out after {0:?}")]
    IdentifyTimeout(Duration),

    /// Shards that did not close within the shutdown timeout
    #[error("Shutdown timed out for shards {0:?}")]
    ShutdownTimeout(Vec<u32>),

    #[error("Gateway info request failed: {0}")]
    GatewayInfo(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// The command budget of a connection is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limited, retry after {retry_after:?}")]
pub struct RateLimited {
    /// Time until the budget refills
    pub retry_after: Duration,
}

/// Why a shard stopped for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The server closed with a code that forbids reconnecting
    CloseCode,
    /// A reconnectable disconnect happened with auto-reconnect turned off
    ReconnectDisabled,
    /// Consecutive reconnect attempts hit the configured maximum
    RetriesExhausted,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CloseCode => "fatal close code",
            Self::ReconnectDisabled => "reconnect disabled",
            Self::RetriesExhausted => "retries exhausted",
        })
    }
}

/// Terminal shard failure, as surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Shard {shard_id} failed ({kind}): {reason}")]
pub struct FatalError {
    pub shard_id: u32,
    pub kind: FatalKind,
    /// Close code of the disconnect that ended the shard, if any
    pub close_code: Option<u16>,
    pub reason: String,
}

impl FatalError {
    /// Gateway close code, when the raw code is one
    #[must_use]
    pub fn gateway_close_code(&self) -> Option<CloseCode> {
        self.close_code.and_then(CloseCode::from_u16)
    }
}

/// Connector and socket failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Failed to receive frame: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,
}

/// Inbound frame decoding failures
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dispatch frame without event type")]
    MissingEventType,

    #[error("Missing payload for {0}")]
    MissingPayload(OpCode),

    #[error("Failed to decode binary frame: {0}")]
    Binary(String),
}
