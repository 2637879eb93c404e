use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::error::TransportError;

/// Delivery of encoded messages to a named endpoint. Mockable for testing.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &str, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// In-process transport: one bounded mpsc channel per connected endpoint.
pub struct LocalTransport {
    endpoints: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl LocalTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register `id` and hand back its inbox. Reconnecting replaces the old inbox.
    pub async fn connect(&self, id: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.endpoints.write().await.insert(id.to_string(), tx);
        debug!(endpoint = %id, "Endpoint connected");
        rx
    }

    pub async fn disconnect(&self, id: &str) -> bool {
        self.endpoints.write().await.remove(id).is_some()
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.endpoints.read().await.contains_key(id)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, target: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        // Clone the sender so the map lock is released before awaiting capacity.
        let sender = self
            .endpoints
            .read()
            .await
            .get(target)
            .cloned()
            .ok_or_else(|| TransportError::UnknownEndpoint(target.to_string()))?;
        sender
            .send(bytes)
            .await
            .map_err(|_| TransportError::Closed(target.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_connected_endpoint() {
        let transport = LocalTransport::default();
        let mut rx = transport.connect("bot-1").await;
        transport.send("bot-1", b"hello".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn unknown_endpoint() {
        let transport = LocalTransport::default();
        let err = transport.send("ghost", vec![]).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownEndpoint("ghost".to_string()));
    }

    #[tokio::test]
    async fn dropped_inbox_is_closed() {
        let transport = LocalTransport::default();
        let rx = transport.connect("bot-1").await;
        drop(rx);
        let err = transport.send("bot-1", vec![1]).await.unwrap_err();
        assert_eq!(err, TransportError::Closed("bot-1".to_string()));
    }

    #[tokio::test]
    async fn disconnect_removes_endpoint() {
        let transport = LocalTransport::default();
        let _rx = transport.connect("bot-1").await;
        assert!(transport.disconnect("bot-1").await);
        assert!(!transport.is_connected("bot-1").await);
        assert!(!transport.disconnect("bot-1").await);
    }
}
