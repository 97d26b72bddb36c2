//! Payload definitions
//!
//! `d` payloads of the frames the client sends, plus Hello.

use fluxer_core::{Activity, Intents, OnlineStatus, Snowflake};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 41_250;

    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::with_interval(Self::DEFAULT_HEARTBEAT_INTERVAL)
    }
}

/// Payload for op 2 (Identify)
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,

    pub properties: IdentifyProperties,

    pub intents: Intents,

    /// Whether per-payload compression is requested
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compress: bool,

    /// Member count above which offline members are not sent in guild payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,

    /// `[shard_id, shard_count]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Initial presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdatePayload>,
}

impl fmt::Debug for IdentifyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyPayload")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("intents", &self.intents)
            .field("compress", &self.compress)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .field("presence", &self.presence)
            .finish()
    }
}

/// Client connection properties
///
/// Identifies the library and OS to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    /// Library name
    pub browser: String,
    /// Library name
    pub device: String,
}

impl IdentifyProperties {
    pub const LIBRARY_NAME: &'static str = "fluxer-rs";

    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: Self::LIBRARY_NAME.to_string(),
            device: Self::LIBRARY_NAME.to_string(),
        }
    }
}

/// Payload for op 3 (Presence Update), also embedded in Identify
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// Unix time in milliseconds when the client went idle
    pub since: Option<i64>,

    #[serde(default)]
    pub activities: Vec<Activity>,

    pub status: OnlineStatus,

    #[serde(default)]
    pub afk: bool,
}

impl PresenceUpdatePayload {
    #[must_use]
    pub fn new(status: OnlineStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: OnlineStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_afk(mut self, afk: bool) -> Self {
        self.afk = afk;
        self
    }

    #[must_use]
    pub fn with_since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    /// Replace the activity list with a single activity
    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities = vec![activity];
        self
    }
}

/// Payload for op 4 (Voice State Update)
///
/// `channel_id: None` leaves the voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateUpdatePayload {
    #[must_use]
    pub fn join(guild_id: Snowflake, channel_id: Snowflake) -> Self {
        Self {
            guild_id,
            channel_id: Some(channel_id),
            self_mute: false,
            self_deaf: false,
        }
    }

    #[must_use]
    pub fn leave(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }
    }

    #[must_use]
    pub fn with_mute(mut self, self_mute: bool) -> Self {
        self.self_mute = self_mute;
        self
    }

    #[must_use]
    pub fn with_deaf(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }
}

/// Payload for op 6 (Resume)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

impl fmt::Debug for ResumePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumePayload")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Payload for op 8 (Request Guild Members)
///
/// Either `query` or `user_ids` is set, never both; the constructors
/// enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,

    /// Username prefix; empty string requests every member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum members to return; 0 means no limit for an empty query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub presences: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Snowflake>,

    /// Echoed back in every GUILD_MEMBERS_CHUNK answering this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembersPayload {
    pub const MAX_NONCE_LEN: usize = 32;

    /// Members whose username starts with `query`
    #[must_use]
    pub fn by_query(guild_id: Snowflake, query: impl Into<String>, limit: u32) -> Self {
        Self {
            guild_id,
            query: Some(query.into()),
            limit: Some(limit),
            presences: false,
            user_ids: Vec::new(),
            nonce: None,
        }
    }

    /// Specific members by id
    #[must_use]
    pub fn by_user_ids(guild_id: Snowflake, user_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_id,
            query: None,
            limit: None,
            presences: false,
            user_ids,
            nonce: None,
        }
    }

    #[must_use]
    pub fn with_presences(mut self, presences: bool) -> Self {
        self.presences = presences;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Fill in a random nonce when none was given and return the nonce in use
    pub fn ensure_nonce(&mut self) -> &str {
        self.nonce
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .as_str()
    }
}
