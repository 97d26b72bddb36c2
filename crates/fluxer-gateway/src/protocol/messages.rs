//! Gateway message format
//!
//! The `{op, s, t, d}` envelope every frame uses, outbound constructors, and
//! decoding of inbound frames into [`InboundFrame`].

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload,
    ResumePayload, VoiceStateUpdatePayload,
};
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            t: None,
            s: None,
            d: Some(serde_json::to_value(payload)?),
        })
    }

    fn bare(op: OpCode) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: None,
        }
    }

    // === Client Messages ===

    /// Heartbeat (op=1) carrying the last sequence received, or null
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
        }
    }

    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Identify, payload)
    }

    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Resume, payload)
    }

    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::PresenceUpdate, payload)
    }

    pub fn voice_state_update(
        payload: &VoiceStateUpdatePayload,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::VoiceStateUpdate, payload)
    }

    pub fn request_guild_members(
        payload: &RequestGuildMembersPayload,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::RequestGuildMembers, payload)
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    pub fn hello(payload: HelloPayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Hello, &payload)
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::bare(OpCode::HeartbeatAck)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::bare(OpCode::Reconnect)
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self {
            op: OpCode::InvalidSession,
            t: None,
            s: None,
            d: Some(Value::Bool(resumable)),
        }
    }

    // === Parsing Client Messages ===

    /// Try to parse as an Identify payload (op=2)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        self.payload_if(OpCode::Identify)
    }

    /// Try to parse as a Resume payload (op=6)
    pub fn as_resume(&self) -> Option<ResumePayload> {
        self.payload_if(OpCode::Resume)
    }

    pub fn as_presence_update(&self) -> Option<PresenceUpdatePayload> {
        self.payload_if(OpCode::PresenceUpdate)
    }

    pub fn as_voice_state_update(&self) -> Option<VoiceStateUpdatePayload> {
        self.payload_if(OpCode::VoiceStateUpdate)
    }

    pub fn as_request_guild_members(&self) -> Option<RequestGuildMembersPayload> {
        self.payload_if(OpCode::RequestGuildMembers)
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    fn payload_if<T: serde::de::DeserializeOwned>(&self, op: OpCode) -> Option<T> {
        if self.op != op {
            return None;
        }
        self.d
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    // === Utilities ===

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}

/// Envelope of one dispatch frame
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFrame {
    pub sequence: Option<u64>,
    pub event_type: String,
    pub data: Value,
}

/// A decoded inbound frame, keyed by op code
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Dispatch(DispatchFrame),
    /// The server asks for an immediate heartbeat
    Heartbeat,
    Reconnect,
    InvalidSession { resumable: bool },
    Hello(HelloPayload),
    HeartbeatAck,
    /// Op codes the client does not expect to receive
    Unknown { op: u8 },
}

/// Raw envelope; the op code is kept numeric so unknown codes still decode
#[derive(Deserialize)]
struct RawFrame {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Option<Value>,
}

impl InboundFrame {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        let frame = match OpCode::from_u8(raw.op) {
            Some(OpCode::Dispatch) => Self::Dispatch(DispatchFrame {
                sequence: raw.s,
                event_type: raw.t.ok_or(DecodeError::MissingEventType)?,
                data: raw.d.unwrap_or(Value::Null),
            }),
            Some(OpCode::Heartbeat) => Self::Heartbeat,
            Some(OpCode::Reconnect) => Self::Reconnect,
            Some(OpCode::InvalidSession) => Self::InvalidSession {
                resumable: raw.d.as_ref().and_then(Value::as_bool).unwrap_or(false),
            },
            Some(OpCode::Hello) => {
                let d = raw.d.ok_or(DecodeError::MissingPayload(OpCode::Hello))?;
                Self::Hello(serde_json::from_value(d)?)
            }
            Some(OpCode::HeartbeatAck) => Self::HeartbeatAck,
            _ => Self::Unknown { op: raw.op },
        };

        Ok(frame)
    }

    #[must_use]
    pub fn op(&self) -> u8 {
        match self {
            Self::Dispatch(_) => OpCode::Dispatch.as_u8(),
            Self::Heartbeat => OpCode::Heartbeat.as_u8(),
            Self::Reconnect => OpCode::Reconnect.as_u8(),
            Self::InvalidSession { .. } => OpCode::InvalidSession.as_u8(),
            Self::Hello(_) => OpCode::Hello.as_u8(),
            Self::HeartbeatAck => OpCode::HeartbeatAck.as_u8(),
            Self::Unknown { op } => *op,
        }
    }
}
