//! Binary frame decoding

use crate::error::DecodeError;

/// Turns binary frames into JSON text.
///
/// One decoder lives per socket, so stream codecs can keep state between
/// frames. `Ok(None)` means the frame was buffered and no message is complete
/// yet.
pub trait FrameDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Option<String>, DecodeError>;
}

/// Treats every binary frame as a complete UTF-8 message
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Decoder;

impl FrameDecoder for Utf8Decoder {
    fn decode(&mut self, data: &[u8]) -> Result<Option<String>, DecodeError> {
        std::str::from_utf8(data)
            .map(|text| Some(text.to_string()))
            .map_err(|e| DecodeError::Binary(e.to_string()))
    }
}
