//! Disconnect classification
//!
//! Every way a socket can end is turned into a [`DisconnectReason`], and
//! every reason maps onto one [`CloseClassification`] that decides between
//! resuming, identifying again and stopping.

use crate::protocol::{CloseClassification, CloseCode};
use std::fmt;

/// Which side started the close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    Local,
    Remote,
}

/// A close handshake, as consumed by the reconnect decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub initiated_by: CloseInitiator,
}

impl CloseEvent {
    #[must_use]
    pub fn remote(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            initiated_by: CloseInitiator::Remote,
        }
    }

    #[must_use]
    pub fn gateway_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gateway_code() {
            Some(code) => write!(f, "{code}"),
            None if self.reason.is_empty() => write!(f, "close code {}", self.code),
            None => write!(f, "close code {}: {}", self.code, self.reason),
        }
    }
}

/// Why a socket ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Close frame received (or the stream ended after one)
    Closed(CloseEvent),
    /// Connect, read or write failure without a close frame
    TransportError(String),
    /// Server sent op 7
    Reconnect,
    /// Server sent op 9
    InvalidSession { resumable: bool },
    /// A heartbeat came due before the previous one was acknowledged
    Zombie,
    /// The identify gate did not admit the shard in time
    IdentifyTimeout,
    /// The caller closed the shard
    Local,
}

impl DisconnectReason {
    /// Map onto resume / re-identify / fatal.
    ///
    /// `Local` is reported as `Fatal`: a caller close never reconnects.
    #[must_use]
    pub fn classify(&self) -> CloseClassification {
        match self {
            Self::Closed(event) => CloseCode::classify_raw(event.code),
            Self::TransportError(_) | Self::Reconnect | Self::Zombie => {
                CloseClassification::ResumeAllowed
            }
            Self::InvalidSession { resumable: true } => CloseClassification::ResumeAllowed,
            Self::InvalidSession { resumable: false } | Self::IdentifyTimeout => {
                CloseClassification::MustReidentify
            }
            Self::Local => CloseClassification::Fatal,
        }
    }

    /// Close code to send when tearing the socket down for this reason
    #[must_use]
    pub fn local_close_code(&self) -> u16 {
        match self {
            Self::Local => crate::protocol::CLIENT_CLOSE_NORMAL,
            _ => crate::protocol::CLIENT_CLOSE_RESUME,
        }
    }

    /// Raw close code, when the server sent one
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed(event) => Some(event.code),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(event) => write!(f, "{event}"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::Reconnect => f.write_str("server requested reconnect"),
            Self::InvalidSession { resumable } => {
                write!(f, "invalid session (resumable: {resumable})")
            }
            Self::Zombie => f.write_str("heartbeat not acknowledged"),
            Self::IdentifyTimeout => f.write_str("identify gate timed out"),
            Self::Local => f.write_str("closed by caller"),
        }
    }
}

/// Free-function form of [`DisconnectReason::classify`]
#[must_use]
pub fn classify(reason: &DisconnectReason) -> CloseClassification {
    reason.classify()
}
