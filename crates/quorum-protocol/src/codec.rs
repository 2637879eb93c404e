use quorum_models::message::{Message, MessageKind};

use crate::error::ProtocolError;

/// Encode a message as JSON bytes. Map fields are ordered, so equal messages
/// always encode to equal bytes.
pub fn serialize(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Encode)
}

pub fn deserialize(bytes: &[u8]) -> Result<Message, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Best-effort recovery of the sender from bytes that failed to decode, so a
/// typed error can still be sent back.
pub fn claimed_sender(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("source_agent")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Best-effort recovery of the message kind from bytes that failed to decode.
pub fn claimed_kind(bytes: &[u8]) -> Option<MessageKind> {
    let mut value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    serde_json::from_value(value.get_mut("kind")?.take()).ok()
}
