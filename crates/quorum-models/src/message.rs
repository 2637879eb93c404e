use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Target sentinel addressing every registered agent.
pub const BROADCAST_TARGET: &str = "all";

/// Ordered key/value map carried in payloads. Ordered so that the canonical
/// byte form used for signing is stable.
pub type DataMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Command,
    Response,
    Broadcast,
    Telemetry,
    Heartbeat,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Response => "response",
            MessageKind::Broadcast => "broadcast",
            MessageKind::Telemetry => "telemetry",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action name plus free-form data and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Payload {
    pub action: String,
    #[serde(default)]
    pub data: DataMap,
    #[serde(default)]
    pub metadata: DataMap,
}

impl Payload {
    pub fn new(action: impl Into<String>, data: DataMap, metadata: DataMap) -> Self {
        Self {
            action: action.into(),
            data,
            metadata,
        }
    }
}

/// Signature block attached to a signed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityBlock {
    /// Hex-encoded HMAC-SHA256.
    pub signature: String,
    pub nonce: String,
    /// When the signature was produced.
    pub timestamp: DateTime<Utc>,
}

/// The unit of communication between the command center and agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_agent: String,
    /// A specific agent id, or [`BROADCAST_TARGET`].
    pub target_agent: String,
    pub kind: MessageKind,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityBlock>,
}

impl Message {
    pub fn new(
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        kind: MessageKind,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_agent: source_agent.into(),
            target_agent: target_agent.into(),
            kind,
            payload,
            security: None,
        }
    }

    /// Consume the message and return it with the given security block.
    pub fn with_security(self, security: SecurityBlock) -> Self {
        Self {
            security: Some(security),
            ..self
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_agent == BROADCAST_TARGET
    }

    pub fn is_signed(&self) -> bool {
        self.security.is_some()
    }

    /// Back-reference to the command a response or error answers.
    pub fn original_id(&self) -> Option<Uuid> {
        self.payload
            .data
            .get("original_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Body of a response message: `{success, original_id, result, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseBody {
    pub success: bool,
    pub original_id: Uuid,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseBody {
    pub fn ok(original_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            success: true,
            original_id,
            result,
            error: None,
        }
    }

    pub fn failed(original_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            success: false,
            original_id,
            result: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn into_data(self) -> DataMap {
        let mut data = DataMap::new();
        data.insert("success".to_string(), serde_json::Value::Bool(self.success));
        data.insert(
            "original_id".to_string(),
            serde_json::Value::String(self.original_id.to_string()),
        );
        data.insert("result".to_string(), self.result);
        if let Some(error) = self.error {
            data.insert("error".to_string(), serde_json::Value::String(error));
        }
        data
    }

    pub fn from_data(data: &DataMap) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut data = DataMap::new();
        data.insert("symbol".to_string(), serde_json::json!("BTCUSDT"));
        data.insert("timeframe".to_string(), serde_json::json!("1h"));
        Message::new(
            "command_center",
            "bot-1",
            MessageKind::Command,
            Payload::new("forecast", data, DataMap::new()),
        )
    }

    #[test]
    fn roundtrip_message() {
        let message = sample_message();
        let json = serde_json::to_string(&message).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, parsed);
        assert!(!json.contains("security"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Heartbeat).unwrap(),
            "\"heartbeat\""
        );
    }

    #[test]
    fn with_security_keeps_identity() {
        let message = sample_message();
        let id = message.id;
        let signed = message.with_security(SecurityBlock {
            signature: "ab".to_string(),
            nonce: "cd".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(signed.id, id);
        assert!(signed.is_signed());
    }

    #[test]
    fn response_body_through_data_map() {
        let original = Uuid::new_v4();
        let body = ResponseBody::ok(original, serde_json::json!({"signal": "BUY"}));
        let data = body.clone().into_data();
        assert!(!data.contains_key("error"));

        let parsed = ResponseBody::from_data(&data).unwrap();
        assert_eq!(parsed, body);

        let message = Message::new(
            "bot-1",
            "command_center",
            MessageKind::Response,
            Payload::new("response", data, DataMap::new()),
        );
        assert_eq!(message.original_id(), Some(original));
    }

    #[test]
    fn response_body_rejects_missing_fields() {
        let mut data = DataMap::new();
        data.insert("success".to_string(), serde_json::json!(true));
        assert!(ResponseBody::from_data(&data).is_err());
    }

    #[test]
    fn broadcast_target() {
        let message = Message::new(
            "bot-1",
            BROADCAST_TARGET,
            MessageKind::Broadcast,
            Payload::new("pattern", DataMap::new(), DataMap::new()),
        );
        assert!(message.is_broadcast());
    }
}
