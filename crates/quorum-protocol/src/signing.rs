use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use quorum_models::message::{Message, MessageKind, Payload, SecurityBlock};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ProtocolError;

type HmacSha256 = Hmac<Sha256>;

/// The deterministic fields of a message, in a fixed order.
#[derive(Serialize)]
struct SignedFields<'a> {
    id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    source_agent: &'a str,
    target_agent: &'a str,
    kind: MessageKind,
    payload: &'a Payload,
}

/// Stable byte form of everything the signature covers except nonce and signing time.
pub fn canonical_bytes(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let fields = SignedFields {
        id: &message.id,
        timestamp: &message.timestamp,
        source_agent: &message.source_agent,
        target_agent: &message.target_agent,
        kind: message.kind,
        payload: &message.payload,
    };
    serde_json::to_vec(&fields).map_err(ProtocolError::Encode)
}

/// 16 random bytes, hex-encoded.
pub fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

fn keyed_mac(
    message: &Message,
    key: &[u8],
    nonce: &str,
    signed_at: &DateTime<Utc>,
) -> Result<HmacSha256, ProtocolError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ProtocolError::Key(e.to_string()))?;
    mac.update(&canonical_bytes(message)?);
    mac.update(nonce.as_bytes());
    mac.update(
        signed_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    Ok(mac)
}

/// Sign with an explicit nonce and signing time.
pub fn sign_with(
    message: &Message,
    key: &[u8],
    nonce: String,
    signed_at: DateTime<Utc>,
) -> Result<SecurityBlock, ProtocolError> {
    let mac = keyed_mac(message, key, &nonce, &signed_at)?;
    Ok(SecurityBlock {
        signature: hex::encode(mac.finalize().into_bytes()),
        nonce,
        timestamp: signed_at,
    })
}

/// Produce a security block for `message` with a fresh nonce.
pub fn sign(message: &Message, key: &[u8]) -> Result<SecurityBlock, ProtocolError> {
    sign_with(message, key, generate_nonce(), Utc::now())
}

/// Recompute the signature from the message's own nonce and signing time and
/// compare it in constant time. Unsigned or malformed blocks never verify.
pub fn verify(message: &Message, key: &[u8]) -> bool {
    let Some(security) = &message.security else {
        return false;
    };
    let Ok(expected) = hex::decode(&security.signature) else {
        return false;
    };
    match keyed_mac(message, key, &security.nonce, &security.timestamp) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
