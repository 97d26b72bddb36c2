//! Transport abstraction
//!
//! A shard only needs to open a socket, write frames, read frames and close.
//! [`Connector`] hands out the two halves; [`WebSocketConnector`] is the
//! production implementation over `tokio-tungstenite`.

mod decoder;
mod websocket;

pub use decoder::{FrameDecoder, Utf8Decoder};
pub use websocket::WebSocketConnector;

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;

/// Transport-level compression requested in the connection URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    ZlibStream,
}

impl Compression {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ZlibStream => "zlib-stream",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close frame as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// One frame read from or written to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Close handshake; `None` when the peer sent no status code
    Close(Option<CloseFrame>),
}

/// Write half of a socket
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Start the close handshake with the given status code
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a socket
#[async_trait]
pub trait FrameStream: Send {
    /// Next data or close frame; `None` once the socket is gone.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Opens sockets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

/// Build the connection URL: `<base>?v=<version>&encoding=json&compress=<mode>`
#[must_use]
pub fn gateway_url(base: &str, version: u8, compression: Compression) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}v={version}&encoding=json&compress={compression}")
}
