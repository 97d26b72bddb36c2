//! Fluxer core value objects
//!
//! Identifier, intent and presence types shared by the client crates.

pub mod intents;
pub mod presence;
pub mod snowflake;

pub use intents::Intents;
pub use presence::{Activity, ActivityType, OnlineStatus};
pub use snowflake::{Snowflake, SnowflakeParseError};
