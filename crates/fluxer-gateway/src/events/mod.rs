//! Gateway events
//!
//! Dispatch event names, typed payloads and the decoder table.

mod dispatch;
mod event_types;
mod payloads;

pub use dispatch::{DispatchEvent, GatewayEvent};
pub use event_types::GatewayEventType;
pub use payloads::{
    GuildMembersChunkEvent, RateLimitedEvent, ReadyEvent, RequestGuildMembersMeta,
    UnavailableGuild, UserPayload, VoiceServerUpdateEvent,
};
