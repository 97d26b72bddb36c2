//! Gateway protocol definitions
//!
//! Op codes, close codes, the frame envelope and the payloads carried in it.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseClassification, CloseCode, CLIENT_CLOSE_NORMAL, CLIENT_CLOSE_RESUME};
pub use messages::{DispatchFrame, GatewayMessage, InboundFrame};
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};
