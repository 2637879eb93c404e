use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message bytes: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Message encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Invalid signing key: {0}")]
    Key(String),
}
