/// A single message as carried by a transport link, before frame decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WireMessage::Text(text) => text.as_bytes(),
            WireMessage::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireMessage::Text(text) => text.into_bytes(),
            WireMessage::Binary(bytes) => bytes,
        }
    }
}
