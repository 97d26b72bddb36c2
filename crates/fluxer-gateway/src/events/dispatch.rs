//! Dispatch decoding
//!
//! Turns a dispatch frame into a typed [`GatewayEvent`] through a table
//! keyed by event type.

use super::{
    GatewayEventType, GuildMembersChunkEvent, RateLimitedEvent, ReadyEvent,
    VoiceServerUpdateEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Decoded dispatch payload
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(Box<ReadyEvent>),
    Resumed,
    RateLimited(RateLimitedEvent),
    GuildMembersChunk(GuildMembersChunkEvent),
    VoiceServerUpdate(VoiceServerUpdateEvent),
    /// Any event without a typed payload here
    Other(Value),
}

type EventDecoder = fn(Value) -> Result<GatewayEvent, serde_json::Error>;

static DECODERS: LazyLock<HashMap<GatewayEventType, EventDecoder>> = LazyLock::new(|| {
    let mut table: HashMap<GatewayEventType, EventDecoder> = HashMap::new();
    table.insert(GatewayEventType::Ready, |d| {
        serde_json::from_value(d).map(|e| GatewayEvent::Ready(Box::new(e)))
    });
    table.insert(GatewayEventType::Resumed, |_| Ok(GatewayEvent::Resumed));
    table.insert(GatewayEventType::RateLimited, |d| {
        serde_json::from_value(d).map(GatewayEvent::RateLimited)
    });
    table.insert(GatewayEventType::GuildMembersChunk, |d| {
        serde_json::from_value(d).map(GatewayEvent::GuildMembersChunk)
    });
    table.insert(GatewayEventType::VoiceServerUpdate, |d| {
        serde_json::from_value(d).map(GatewayEvent::VoiceServerUpdate)
    });
    table
});

impl GatewayEvent {
    /// Decode the payload of a dispatch with the given event type.
    ///
    /// Event types without a decoder yield [`GatewayEvent::Other`].
    pub fn decode(event_type: GatewayEventType, data: &Value) -> Result<Self, serde_json::Error> {
        match DECODERS.get(&event_type) {
            Some(decode) => decode(data.clone()),
            None => Ok(Self::Other(data.clone())),
        }
    }
}

/// A dispatch delivered to the event handler
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub sequence: Option<u64>,
    /// Raw event name as received
    pub event_type: String,
    pub kind: GatewayEventType,
    /// Raw payload
    pub data: Value,
    /// Typed payload, `Other` when no decoder exists or decoding failed
    pub event: GatewayEvent,
}
