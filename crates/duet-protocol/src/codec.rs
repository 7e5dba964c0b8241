//! Text-frame codec: one JSON message per frame.

use serde::Serialize;
use thiserror::Error;

use crate::message::{ClientMessage, ServerMessage};

/// Default upper bound for a single inbound frame (64 KiB).
///
/// Session descriptions are a few KiB; anything far larger is not a
/// legitimate handshake payload.
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Errors produced while decoding or encoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Short machine-readable code sent back in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MessageTooLarge { .. } => "message-too-large",
            Self::Malformed(_) => "malformed-message",
        }
    }
}

/// Decodes a client frame, enforcing `max_size`.
pub fn decode_client(text: &str, max_size: usize) -> Result<ClientMessage, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Decodes a server frame (client side).
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes any protocol message to its frame text.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}
