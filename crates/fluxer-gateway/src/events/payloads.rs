//! Event payload definitions
//!
//! Typed payloads for the dispatch events the gateway engine itself reads.
//! Everything else reaches the handler as raw JSON.

use crate::protocol::OpCode;
use fluxer_core::Snowflake;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// === Session Events ===

/// READY event payload
///
/// Sent after a successful Identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    #[serde(default)]
    pub v: u8,

    #[serde(default)]
    pub user: UserPayload,

    /// Guilds the user is in (initially unavailable)
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,

    /// Session ID for resuming
    pub session_id: String,

    /// Gateway URL to use when resuming this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, shard_count]` echoed from Identify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// Unavailable guild in READY event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// The connected user as sent in READY
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// RATE_LIMITED event payload
///
/// The server dropped a command because it was sent too often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitedEvent {
    /// Op code of the rate limited command
    pub opcode: u8,

    /// Seconds to wait before retrying
    pub retry_after: f64,

    #[serde(default)]
    pub meta: Value,
}

/// Metadata attached to a rate limited Request Guild Members command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembersMeta {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl RateLimitedEvent {
    #[must_use]
    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode)
    }

    #[must_use]
    pub fn retry_after(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_after).unwrap_or_default()
    }

    /// Metadata for Request Guild Members, when that is the limited command
    #[must_use]
    pub fn request_guild_members_meta(&self) -> Option<RequestGuildMembersMeta> {
        if self.op() != Some(OpCode::RequestGuildMembers) {
            return None;
        }
        serde_json::from_value(self.meta.clone()).ok()
    }
}

// === Guild Events ===

/// GUILD_MEMBERS_CHUNK event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkEvent {
    pub guild_id: Snowflake,

    /// Member objects; their schema belongs to the entity layer
    #[serde(default)]
    pub members: Vec<Value>,

    pub chunk_index: u32,
    pub chunk_count: u32,

    /// Requested user ids that were not found
    #[serde(default)]
    pub not_found: Vec<Snowflake>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presences: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl GuildMembersChunkEvent {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 >= self.chunk_count
    }
}

// === Voice Events ===

/// VOICE_SERVER_UPDATE event payload
#[derive(Clone, Serialize, Deserialize)]
pub struct VoiceServerUpdateEvent {
    pub guild_id: Snowflake,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Snowflake>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// `None` when the voice server went away and a new one is being allocated
    pub endpoint: Option<String>,

    pub token: String,
}

impl std::fmt::Debug for VoiceServerUpdateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceServerUpdateEvent")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("connection_id", &self.connection_id)
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}
