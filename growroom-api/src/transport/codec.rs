use super::MAX_FRAME_SIZE;
use super::error::{Result, TransportError};
use crate::message::Envelope;

/// Encodes an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Decodes a text frame into an envelope.
pub fn decode(frame: &str) -> Result<Envelope> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(frame.len()));
    }

    serde_json::from_str(frame).map_err(|e| TransportError::Deserialization(e.to_string()))
}
