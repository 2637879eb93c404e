use quorum_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Message codec error: {0}")]
    Decode(#[from] ProtocolError),

    #[error("Signature validation failed for message from {0}")]
    Signature(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("No target agents for command")]
    NoTargets,

    #[error("Command timed out after {0} ms")]
    Timeout(u64),

    #[error("Agent {agent} unreachable: {reason}")]
    AgentUnreachable { agent: String, reason: String },

    #[error("No agent answered {0}")]
    NoResponses(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures inside an agent adapter while answering a command.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Capability not supported: {0}")]
    Unsupported(String),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Agent payload parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint closed: {0}")]
    Closed(String),
}
