//! # fluxer-gateway
//!
//! Client side of the Fluxer gateway: sharded WebSocket connections that
//! identify, heartbeat, resume and reconnect on their own, with per-socket
//! command budgets and a shared identify gate.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway_info;
pub mod handler;
pub mod manager;
pub mod protocol;
pub mod ratelimit;
pub mod shard;
pub mod transport;

pub use config::{GatewayConfig, SendPolicy};
pub use error::{FatalError, FatalKind, GatewayError, GatewayResult, RateLimited, TransportError};
pub use events::{DispatchEvent, GatewayEvent, GatewayEventType};
pub use gateway_info::{GatewayInfo, GatewayInfoProvider, HttpGatewayInfo, SessionStartLimit};
pub use handler::{EventHandler, NoopHandler, ShardEvent};
pub use manager::ShardManager;
pub use protocol::{CloseClassification, CloseCode, GatewayMessage, OpCode};
pub use ratelimit::{CommandRateLimiter, IdentifyGate, IdentifyLimiter, NoopIdentifyGate};
pub use shard::{
    ConnectionState, ReconnectBackoff, SessionState, ShardConnection, ShardDescriptor,
};
pub use transport::{Connector, WebSocketConnector};
