use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quorum_models::agent::AgentStatus;
use quorum_models::command::CommandKind;
use quorum_models::message::{DataMap, Message, MessageKind};
use quorum_protocol::{claimed_kind, claimed_sender, MessageProtocol};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::AgentAdapter;
use crate::error::{AgentError, CoordinationError};
use crate::transport::Transport;

/// Agent-side runtime: answers signed commands from the command center with
/// whatever its adapter can do.
pub struct AgentNode {
    adapter: AgentAdapter,
    protocol: Arc<MessageProtocol>,
    transport: Arc<dyn Transport>,
    status: RwLock<AgentStatus>,
    settings: RwLock<DataMap>,
    commands_handled: AtomicU64,
    commands_failed: AtomicU64,
    patterns_received: AtomicU64,
    shutdown: CancellationToken,
}

impl AgentNode {
    /// `protocol` must be built with this agent's id.
    pub fn new(
        adapter: AgentAdapter,
        protocol: Arc<MessageProtocol>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            adapter,
            protocol,
            transport,
            status: RwLock::new(AgentStatus::Online),
            settings: RwLock::new(DataMap::new()),
            commands_handled: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            patterns_received: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.adapter.id()
    }

    pub fn adapter(&self) -> &AgentAdapter {
        &self.adapter
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.read().await
    }

    pub async fn settings(&self) -> DataMap {
        self.settings.read().await.clone()
    }

    /// Cancelled once a `shutdown` command has been answered.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn commands_handled(&self) -> u64 {
        self.commands_handled.load(Ordering::Relaxed)
    }

    /// Handle one inbound message. Rejected messages are answered with an
    /// error message to the claimed sender; rejected error messages are
    /// only logged.
    pub async fn handle(&self, bytes: &[u8]) -> Result<MessageKind, CoordinationError> {
        let message = match self.protocol.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(agent = %self.id(), error = %e, "Undecodable message");
                if claimed_kind(bytes) == Some(MessageKind::Error) {
                    return Err(e.into());
                }
                if let Some(sender) = claimed_sender(bytes) {
                    self.send(&sender, self.protocol.create_error(&sender, "malformed message", None))
                        .await;
                }
                return Err(e.into());
            }
        };

        if !self.protocol.validate(&message) {
            warn!(agent = %self.id(), source = %message.source_agent, kind = %message.kind, "Signature validation failed");
            if message.kind == MessageKind::Error {
                return Err(CoordinationError::Signature(message.source_agent));
            }
            let reply = self.protocol.create_error(
                &message.source_agent,
                "signature validation failed",
                Some(message.id),
            );
            self.send(&message.source_agent, reply).await;
            return Err(CoordinationError::Signature(message.source_agent));
        }

        match message.kind {
            MessageKind::Command => self.answer(&message).await,
            MessageKind::Broadcast => {
                info!(agent = %self.id(), from = %message.source_agent, action = %message.payload.action, "Broadcast received");
                if message.payload.action == CommandKind::PatternShare.as_str() {
                    self.patterns_received.fetch_add(1, Ordering::Relaxed);
                }
            }
            MessageKind::Error => {
                warn!(agent = %self.id(), from = %message.source_agent, data = ?message.payload.data, "Error message received");
            }
            MessageKind::Response | MessageKind::Heartbeat | MessageKind::Telemetry => {
                debug!(agent = %self.id(), kind = %message.kind, "Ignoring message not meant for agents");
            }
        }
        Ok(message.kind)
    }

    async fn answer(&self, command: &Message) {
        let action = command.payload.action.as_str();
        let result = match CommandKind::parse(action) {
            Some(kind) => self.execute(kind, &command.payload.data).await,
            None => Err(AgentError::Unsupported(format!("command {action}"))),
        };

        let reply = match result {
            Ok(value) => {
                self.commands_handled.fetch_add(1, Ordering::Relaxed);
                self.protocol
                    .create_response(&command.source_agent, command.id, true, value, None)
            }
            Err(e) => {
                self.commands_failed.fetch_add(1, Ordering::Relaxed);
                debug!(agent = %self.id(), action, error = %e, "Command failed");
                self.protocol.create_response(
                    &command.source_agent,
                    command.id,
                    false,
                    serde_json::Value::Null,
                    Some(e.to_string()),
                )
            }
        };
        self.send(&command.source_agent, reply).await;

        if CommandKind::parse(action) == Some(CommandKind::Shutdown) {
            info!(agent = %self.id(), "Shutting down on request");
            self.shutdown.cancel();
        }
    }

    async fn execute(
        &self,
        kind: CommandKind,
        data: &DataMap,
    ) -> Result<serde_json::Value, AgentError> {
        match kind {
            CommandKind::Forecast => {
                let forecaster = self
                    .adapter
                    .forecaster()
                    .ok_or_else(|| AgentError::Unsupported("forecast".to_string()))?;
                let symbol = data
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AgentError::Parse("forecast requires a symbol".to_string()))?;
                let timeframe = data.get("timeframe").and_then(|v| v.as_str()).unwrap_or("1h");
                Ok(serde_json::to_value(forecaster.forecast(symbol, timeframe).await?)?)
            }
            CommandKind::Tune => {
                let tuner = self
                    .adapter
                    .tuner()
                    .ok_or_else(|| AgentError::Unsupported("tune".to_string()))?;
                tuner.tune(data).await
            }
            CommandKind::Status => {
                if data.get("query").and_then(|v| v.as_str()) == Some("portfolio") {
                    let portfolio = self
                        .adapter
                        .portfolio()
                        .ok_or_else(|| AgentError::Unsupported("portfolio".to_string()))?;
                    return Ok(serde_json::to_value(portfolio.portfolio().await?)?);
                }
                Ok(self.status_report().await)
            }
            CommandKind::HealthCheck => Ok(serde_json::json!({
                "healthy": !self.shutdown.is_cancelled(),
                "status": self.status().await,
            })),
            CommandKind::ConfigUpdate => {
                let mut settings = self.settings.write().await;
                settings.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(serde_json::json!({ "updated": data.keys().collect::<Vec<_>>() }))
            }
            CommandKind::PatternShare => {
                let received = self.patterns_received.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(serde_json::json!({ "accepted": true, "patterns_received": received }))
            }
            CommandKind::MlSync => Ok(serde_json::json!({
                "synced": true,
                "model_version": data.get("model_version").cloned().unwrap_or(serde_json::Value::Null),
            })),
            CommandKind::Shutdown => {
                *self.status.write().await = AgentStatus::Offline;
                Ok(serde_json::json!({ "shutting_down": true }))
            }
        }
    }

    async fn status_report(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id(),
            "name": self.adapter.name(),
            "status": self.status().await,
            "capabilities": self.adapter.capabilities(),
            "commands_handled": self.commands_handled(),
            "commands_failed": self.commands_failed.load(Ordering::Relaxed),
        })
    }

    fn performance(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut perf = serde_json::Map::new();
        perf.insert("commands_handled".to_string(), self.commands_handled().into());
        perf.insert(
            "commands_failed".to_string(),
            self.commands_failed.load(Ordering::Relaxed).into(),
        );
        perf.insert(
            "patterns_received".to_string(),
            self.patterns_received.load(Ordering::Relaxed).into(),
        );
        perf
    }

    pub async fn send_heartbeat(&self) -> Result<(), CoordinationError> {
        let status = self.status().await;
        let heartbeat = self
            .protocol
            .create_heartbeat(status.as_str(), Some(self.performance()));
        let bytes = self.protocol.encode(heartbeat)?;
        self.transport
            .send(self.protocol.coordinator_id(), bytes)
            .await?;
        Ok(())
    }

    /// Best-effort send; failures are only logged.
    async fn send(&self, target: &str, message: Message) {
        let bytes = match self.protocol.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(agent = %self.id(), error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.transport.send(target, bytes).await {
            debug!(agent = %self.id(), to = %target, error = %e, "Reply not delivered");
        }
    }

    /// Drain the inbox until cancelled, shut down, or the inbox closes.
    /// Each message is handled on its own task.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        info!(agent = %self.id(), "Agent node started");
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                received = inbox.recv() => {
                    let Some(bytes) = received else { break };
                    let node = Arc::clone(&self);
                    tasks.spawn(async move {
                        if let Err(e) = node.handle(&bytes).await {
                            debug!(agent = %node.id(), error = %e, "Message rejected");
                        }
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(agent = %self.id(), error = %e, "Message task panicked");
                    }
                }
            }
        }
        while tasks.join_next().await.is_some() {}
        info!(agent = %self.id(), "Agent node stopped");
    }

    /// Send a heartbeat every `interval` until cancelled.
    pub async fn run_heartbeats(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.send_heartbeat().await {
                        warn!(agent = %self.id(), error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }
}
