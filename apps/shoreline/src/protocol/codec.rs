use thiserror::Error;

use super::frame::Frame;
use super::wire::WireMessage;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a received wire message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// Anything that did not decode; shown to the user verbatim.
    Raw(Vec<u8>),
}

/// JSON (de)serialization of frames. Stateless; ordering and routing are the
/// caller's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encodes a frame as UTF-8 JSON text.
    pub fn encode(&self, frame: &Frame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn classify(&self, message: WireMessage) -> Inbound {
        match self.decode(message.as_bytes()) {
            Ok(frame) => Inbound::Frame(frame),
            Err(_) => Inbound::Raw(message.into_bytes()),
        }
    }
}
