use std::time::Duration;

use chrono::Utc;
use quorum_models::command::CommandKind;
use quorum_models::config::ProtocolConfig;
use quorum_models::message::{
    DataMap, Message, MessageKind, Payload, ResponseBody, SecurityBlock, BROADCAST_TARGET,
};
use tracing::debug;
use uuid::Uuid;

use crate::codec;
use crate::error::ProtocolError;
use crate::replay::ReplayGuard;
use crate::signing;

/// Builds, signs, validates and encodes messages on behalf of one participant.
pub struct MessageProtocol {
    agent_id: String,
    coordinator_id: String,
    key: Vec<u8>,
    require_signed: bool,
    replay: Option<ReplayGuard>,
}

impl MessageProtocol {
    /// `coordinator_id` is the endpoint heartbeats and telemetry are addressed to.
    pub fn new(
        agent_id: impl Into<String>,
        coordinator_id: impl Into<String>,
        config: &ProtocolConfig,
    ) -> Self {
        let replay = config.replay_window_seconds.map(|secs| {
            ReplayGuard::new(Duration::from_secs(secs), config.replay_cache_capacity)
        });
        Self {
            agent_id: agent_id.into(),
            coordinator_id: coordinator_id.into(),
            key: config.secret_key.as_bytes().to_vec(),
            require_signed: config.require_signed,
            replay,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    pub fn create_command(
        &self,
        target: &str,
        kind: CommandKind,
        data: DataMap,
        metadata: DataMap,
    ) -> Message {
        Message::new(
            self.agent_id.as_str(),
            target,
            MessageKind::Command,
            Payload::new(kind.as_str(), data, metadata),
        )
    }

    pub fn create_response(
        &self,
        target: &str,
        original_id: Uuid,
        success: bool,
        result: serde_json::Value,
        error: Option<String>,
    ) -> Message {
        let body = ResponseBody {
            success,
            original_id,
            result,
            error,
        };
        Message::new(
            self.agent_id.as_str(),
            target,
            MessageKind::Response,
            Payload::new("response", body.into_data(), DataMap::new()),
        )
    }

    pub fn create_broadcast(&self, action: &str, data: DataMap, metadata: DataMap) -> Message {
        Message::new(
            self.agent_id.as_str(),
            BROADCAST_TARGET,
            MessageKind::Broadcast,
            Payload::new(action, data, metadata),
        )
    }

    pub fn create_heartbeat(
        &self,
        status: &str,
        performance: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Message {
        let mut data = DataMap::new();
        data.insert("status".to_string(), serde_json::Value::String(status.to_string()));
        if let Some(performance) = performance {
            data.insert("performance".to_string(), serde_json::Value::Object(performance));
        }
        Message::new(
            self.agent_id.as_str(),
            self.coordinator_id.as_str(),
            MessageKind::Heartbeat,
            Payload::new("heartbeat", data, DataMap::new()),
        )
    }

    pub fn create_telemetry<I>(&self, metrics: I) -> Message
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let data: DataMap = metrics
            .into_iter()
            .map(|(name, value)| (name, serde_json::json!(value)))
            .collect();
        Message::new(
            self.agent_id.as_str(),
            self.coordinator_id.as_str(),
            MessageKind::Telemetry,
            Payload::new("telemetry", data, DataMap::new()),
        )
    }

    /// Typed error reply, e.g. for a message that failed validation.
    pub fn create_error(&self, target: &str, reason: &str, original_id: Option<Uuid>) -> Message {
        let mut data = DataMap::new();
        data.insert("error".to_string(), serde_json::Value::String(reason.to_string()));
        if let Some(id) = original_id {
            data.insert("original_id".to_string(), serde_json::Value::String(id.to_string()));
        }
        Message::new(
            self.agent_id.as_str(),
            target,
            MessageKind::Error,
            Payload::new("error", data, DataMap::new()),
        )
    }

    pub fn sign(&self, message: &Message) -> Result<SecurityBlock, ProtocolError> {
        signing::sign(message, &self.key)
    }

    /// Sign and attach the security block.
    pub fn seal(&self, message: Message) -> Result<Message, ProtocolError> {
        let security = self.sign(&message)?;
        Ok(message.with_security(security))
    }

    /// Whether an inbound message may be acted on. Never errors: callers turn
    /// `false` into an error reply.
    pub fn validate(&self, message: &Message) -> bool {
        let Some(security) = &message.security else {
            if self.require_signed {
                debug!(id = %message.id, source = %message.source_agent, "Unsigned message rejected");
            }
            return !self.require_signed;
        };

        if !signing::verify(message, &self.key) {
            return false;
        }

        match &self.replay {
            Some(guard) => guard.check_and_record(security, Utc::now()),
            None => true,
        }
    }

    /// Seal and serialize in one step, ready for the transport.
    pub fn encode(&self, message: Message) -> Result<Vec<u8>, ProtocolError> {
        codec::serialize(&self.seal(message)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        codec::deserialize(bytes)
    }
}
