//! Outgoing rate limits
//!
//! [`CommandRateLimiter`] budgets caller commands on one socket;
//! [`IdentifyGate`] spaces Identify handshakes across every shard of a token.

mod command;
mod identify;

pub use command::{CommandRateLimiter, RateBudget, RateLimitConfig};
pub use identify::{IdentifyGate, IdentifyLimiter, NoopIdentifyGate};
