use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use quorum_models::agent::{AgentInfo, AgentStatus};
use quorum_models::command::{CommandExecution, CommandKind, CommandOutcome, CommandStats, CommandStatus};
use quorum_models::config::CommandCenterConfig;
use quorum_models::message::{DataMap, Message, MessageKind, ResponseBody};
use quorum_models::status::{ErrorReport, SystemStatus};
use quorum_protocol::{claimed_kind, claimed_sender, MessageProtocol};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CoordinationError;
use crate::execution::{Applied, ExecutionTable};
use crate::registry::AgentRegistry;
use crate::safety::{SafetyMonitor, Severity};
use crate::transport::Transport;

const COMPONENT: &str = "command_center";

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Registers agents, fans commands out to them and gathers the answers
/// under a deadline.
pub struct CommandCenter {
    config: CommandCenterConfig,
    protocol: Arc<MessageProtocol>,
    transport: Arc<dyn Transport>,
    safety: Arc<dyn SafetyMonitor>,
    registry: AgentRegistry,
    executions: Arc<Mutex<ExecutionTable>>,
    stats: Mutex<CommandStats>,
    recent_errors: Mutex<VecDeque<ErrorReport>>,
    started_at: DateTime<Utc>,
}

impl CommandCenter {
    /// `protocol` must be built with `config.id` as its agent id.
    pub fn new(
        config: CommandCenterConfig,
        protocol: Arc<MessageProtocol>,
        transport: Arc<dyn Transport>,
        safety: Arc<dyn SafetyMonitor>,
    ) -> Self {
        let registry = AgentRegistry::new(Duration::from_secs(config.liveness_threshold_seconds));
        Self {
            config,
            protocol,
            transport,
            safety,
            registry,
            executions: Arc::new(Mutex::new(ExecutionTable::new())),
            stats: Mutex::new(CommandStats::default()),
            recent_errors: Mutex::new(VecDeque::new()),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.config.default_timeout_seconds)
    }

    /// Insert or overwrite the agent, then acknowledge with a status command.
    /// Returns false only if the acknowledgement could not be sent; the
    /// record is kept either way.
    pub async fn register_agent(&self, info: AgentInfo) -> bool {
        let id = info.id.clone();
        let replaced = self.registry.upsert(info, Utc::now()).await;
        info!(agent = %id, replaced, "Agent registered");

        let mut metadata = DataMap::new();
        metadata.insert("ack".to_string(), serde_json::Value::Bool(true));
        let ack = self
            .protocol
            .create_command(&id, CommandKind::Status, DataMap::new(), metadata);
        match self.send(&id, ack).await {
            Ok(()) => true,
            Err(e) => {
                warn!(agent = %id, error = %e, "Registration acknowledgement failed");
                false
            }
        }
    }

    pub async fn unregister_agent(&self, id: &str) -> bool {
        let removed = self.registry.remove(id).await;
        if removed {
            info!(agent = %id, "Agent unregistered");
        }
        removed
    }

    async fn send(&self, target: &str, message: Message) -> Result<(), CoordinationError> {
        let bytes = self.protocol.encode(message)?;
        self.transport.send(target, bytes).await?;
        Ok(())
    }

    async fn resolve_targets(&self, requested: Option<Vec<String>>) -> Vec<String> {
        let Some(requested) = requested else {
            return self.registry.ids().await;
        };
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(requested.len());
        for id in requested {
            if !seen.insert(id.clone()) {
                continue;
            }
            if self.registry.contains(&id).await {
                targets.push(id);
            } else {
                warn!(agent = %id, "Skipping unregistered target");
            }
        }
        targets
    }

    /// Fan `kind` out to `targets` (all registered agents when `None`) and
    /// wait until every target settles or `timeout` elapses.
    ///
    /// An empty target set fails with [`CoordinationError::NoTargets`] before
    /// anything is sent. Network-shaped failures (timeouts, unreachable
    /// agents) come back inside the [`CommandOutcome`].
    pub async fn execute_command(
        &self,
        kind: CommandKind,
        data: DataMap,
        targets: Option<Vec<String>>,
        timeout: Duration,
    ) -> Result<CommandOutcome, CoordinationError> {
        let targets = self.resolve_targets(targets).await;
        if targets.is_empty() {
            return Err(CoordinationError::NoTargets);
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| tokio::time::Instant::now() + FAR_FUTURE);
        let now = Utc::now();
        let wall_deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut record = CommandExecution::new(kind, targets.clone(), now, wall_deadline, data.clone());
        record.transition(CommandStatus::Executing, now);
        let mut outbound = Vec::with_capacity(targets.len());
        for target in &targets {
            let message = self
                .protocol
                .create_command(target, kind, data.clone(), DataMap::new());
            record.dispatched.insert(target.clone(), message.id);
            outbound.push((target.clone(), message));
        }
        let command_id = record.id;

        let (done_tx, done_rx) = oneshot::channel();
        self.executions.lock().await.insert(record, done_tx);
        self.stats.lock().await.record_issued();
        info!(command = %command_id, %kind, targets = targets.len(), "Dispatching command");

        // Each send records its own failure, so a stalled send cannot hold
        // the command past its deadline.
        let mut sends = JoinSet::new();
        for (target, message) in outbound {
            let encoded = self.protocol.encode(message);
            let transport = Arc::clone(&self.transport);
            let executions = Arc::clone(&self.executions);
            sends.spawn(async move {
                let sent = match encoded {
                    Ok(bytes) => transport.send(&target, bytes).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(reason) = sent {
                    let failure = CoordinationError::AgentUnreachable {
                        agent: target.clone(),
                        reason,
                    };
                    warn!(command = %command_id, error = %failure, "Send failed");
                    executions.lock().await.apply_failure(
                        command_id,
                        &target,
                        failure.to_string(),
                        Utc::now(),
                    );
                }
            });
        }

        if tokio::time::timeout_at(deadline, done_rx).await.is_err() {
            debug!(command = %command_id, "Deadline reached before all targets settled");
        }
        sends.abort_all();

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = self
            .executions
            .lock()
            .await
            .conclude(command_id, Utc::now(), elapsed_ms)
            .ok_or(CoordinationError::Timeout(elapsed_ms))?;
        self.stats.lock().await.record_outcome(&outcome);
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    fn log_outcome(&self, outcome: &CommandOutcome) {
        if outcome.success {
            info!(
                command = %outcome.command_id,
                kind = %outcome.kind,
                responses = outcome.results.len(),
                failures = outcome.failures.len(),
                elapsed_ms = outcome.execution_time_ms,
                "Command completed"
            );
            return;
        }

        if outcome.error.as_deref() == Some("timeout") {
            let timeout = CoordinationError::Timeout(outcome.execution_time_ms);
            warn!(
                command = %outcome.command_id,
                kind = %outcome.kind,
                missing = ?outcome.missing_agents,
                error = %timeout,
                "Command timed out"
            );
            self.safety.report_condition(
                "command_timeout",
                COMPONENT,
                Severity::Warning,
                &format!("{} {timeout}", outcome.kind),
                serde_json::json!({
                    "command_id": outcome.command_id,
                    "missing_agents": outcome.missing_agents,
                    "answered": outcome.answered().len(),
                }),
            );
        } else {
            warn!(
                command = %outcome.command_id,
                kind = %outcome.kind,
                failures = ?outcome.failures,
                "Command failed"
            );
        }
    }

    /// Like [`execute_command`](Self::execute_command) but from a wire
    /// command name. Unknown names fail before any network activity.
    pub async fn execute_action(
        &self,
        action: &str,
        data: DataMap,
        targets: Option<Vec<String>>,
        timeout: Duration,
    ) -> Result<CommandOutcome, CoordinationError> {
        let kind = CommandKind::parse(action)
            .ok_or_else(|| CoordinationError::UnknownCommand(action.to_string()))?;
        self.execute_command(kind, data, targets, timeout).await
    }

    pub async fn forecast_all(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<CommandOutcome, CoordinationError> {
        let mut data = DataMap::new();
        data.insert("symbol".to_string(), serde_json::json!(symbol));
        data.insert("timeframe".to_string(), serde_json::json!(timeframe));
        self.execute_command(CommandKind::Forecast, data, None, self.default_timeout())
            .await
    }

    pub async fn tune_all(&self, params: DataMap) -> Result<CommandOutcome, CoordinationError> {
        self.execute_command(CommandKind::Tune, params, None, self.default_timeout())
            .await
    }

    /// Send one signed broadcast to every registered agent. Returns how many
    /// deliveries succeeded.
    pub async fn broadcast(&self, action: &str, data: DataMap) -> Result<usize, CoordinationError> {
        let message = self.protocol.create_broadcast(action, data, DataMap::new());
        let bytes = self.protocol.encode(message)?;
        let targets = self.registry.ids().await;
        Ok(self.deliver_all(&targets, &bytes).await)
    }

    async fn deliver_all(&self, targets: &[String], bytes: &[u8]) -> usize {
        let mut delivered = 0;
        for target in targets {
            match self.transport.send(target, bytes.to_vec()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(agent = %target, error = %e, "Broadcast delivery failed"),
            }
        }
        delivered
    }

    /// Route one inbound message. Decode and signature failures are reported
    /// to the safety monitor and answered with an error message to the
    /// claimed sender, unless the rejected message was itself an error.
    /// They are returned but never panic.
    pub async fn handle_incoming(&self, bytes: &[u8]) -> Result<MessageKind, CoordinationError> {
        let message = match self.protocol.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                let sender = claimed_sender(bytes);
                warn!(sender = ?sender, error = %e, "Undecodable message");
                self.safety.report_condition(
                    "decode_failure",
                    COMPONENT,
                    Severity::Warning,
                    &format!("undecodable message: {e}"),
                    serde_json::json!({ "claimed_sender": sender, "bytes": bytes.len() }),
                );
                match (sender, claimed_kind(bytes)) {
                    (_, Some(MessageKind::Error)) => {
                        debug!("Not answering an undecodable error message");
                    }
                    (Some(sender), _) => self.reply_error(&sender, "malformed message", None).await,
                    (None, _) => {}
                }
                return Err(e.into());
            }
        };

        if !self.protocol.validate(&message) {
            let source = message.source_agent.clone();
            warn!(source = %source, id = %message.id, "Signature validation failed");
            self.safety.report_condition(
                "signature_failure",
                COMPONENT,
                Severity::Warning,
                &format!("message {} from {source} failed validation", message.id),
                serde_json::json!({ "source": source, "kind": message.kind.as_str() }),
            );
            if message.kind == MessageKind::Error {
                debug!(source = %source, "Not answering a rejected error message");
            } else {
                self.reply_error(&source, "signature validation failed", Some(message.id))
                    .await;
            }
            return Err(CoordinationError::Signature(source));
        }

        let kind = message.kind;
        match kind {
            MessageKind::Response => self.on_response(message).await,
            MessageKind::Heartbeat => self.on_heartbeat(message).await,
            MessageKind::Telemetry => self.on_telemetry(message).await,
            MessageKind::Broadcast => self.on_broadcast(&message, bytes).await,
            MessageKind::Error => self.on_error(message).await,
            MessageKind::Command => {
                debug!(source = %message.source_agent, action = %message.payload.action, "Rejecting inbound command");
                self.reply_error(
                    &message.source_agent,
                    "the command center does not accept commands",
                    Some(message.id),
                )
                .await;
            }
        }
        Ok(kind)
    }

    async fn reply_error(&self, target: &str, reason: &str, original_id: Option<uuid::Uuid>) {
        let reply = self.protocol.create_error(target, reason, original_id);
        if let Err(e) = self.send(target, reply).await {
            debug!(agent = %target, error = %e, "Error reply not delivered");
        }
    }

    async fn on_response(&self, message: Message) {
        let body = match ResponseBody::from_data(&message.payload.data) {
            Ok(body) => body,
            Err(e) => {
                warn!(source = %message.source_agent, error = %e, "Malformed response payload");
                return;
            }
        };
        let original_id = body.original_id;
        let applied = self.executions.lock().await.apply_response(
            original_id,
            &message.source_agent,
            body,
            Utc::now(),
        );
        match applied {
            Applied::Recorded { latency_ms } => {
                self.registry
                    .record_response_latency(&message.source_agent, latency_ms)
                    .await;
                debug!(source = %message.source_agent, original = %original_id, latency_ms, "Response recorded");
            }
            other => {
                debug!(source = %message.source_agent, original = %original_id, result = ?other, "Dropping response");
            }
        }
    }

    async fn on_heartbeat(&self, message: Message) {
        let data = &message.payload.data;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(AgentStatus::parse)
            .unwrap_or_default();
        let performance = data
            .get("performance")
            .and_then(|v| v.as_object())
            .map(|perf| numeric_entries(perf.iter()));
        if !self
            .registry
            .record_heartbeat(&message.source_agent, status, performance, Utc::now())
            .await
        {
            debug!(source = %message.source_agent, "Heartbeat from unregistered agent");
        }
    }

    async fn on_telemetry(&self, message: Message) {
        let metrics = numeric_entries(message.payload.data.iter());
        if !self
            .registry
            .record_telemetry(&message.source_agent, metrics, Utc::now())
            .await
        {
            debug!(source = %message.source_agent, "Telemetry from unregistered agent");
        }
    }

    /// Forward the original signed bytes to every other registered agent.
    async fn on_broadcast(&self, message: &Message, bytes: &[u8]) {
        let targets: Vec<String> = self
            .registry
            .ids()
            .await
            .into_iter()
            .filter(|id| *id != message.source_agent)
            .collect();
        let delivered = self.deliver_all(&targets, bytes).await;
        debug!(source = %message.source_agent, action = %message.payload.action, delivered, "Broadcast re-fanned");
    }

    async fn on_error(&self, message: Message) {
        let text = message
            .payload
            .data
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or(message.payload.action.as_str())
            .to_string();
        warn!(source = %message.source_agent, error = %text, "Agent reported an error");
        let report = ErrorReport {
            agent_id: message.source_agent.clone(),
            message: text,
            original_id: message.original_id(),
            received_at: Utc::now(),
        };
        let mut errors = self.recent_errors.lock().await;
        errors.push_back(report);
        while errors.len() > self.config.max_recent_errors {
            errors.pop_front();
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        self.system_status_at(Utc::now()).await
    }

    /// Status as seen at `now`; responsiveness is judged from heartbeat age.
    pub async fn system_status_at(&self, now: DateTime<Utc>) -> SystemStatus {
        let agents = self.registry.status_views(now).await;
        let responsive_agents = agents.iter().filter(|a| a.responsive).count();
        let active_commands = self.executions.lock().await.active_count();
        let stats = self.stats.lock().await.clone();
        let recent_errors = self.recent_errors.lock().await.iter().cloned().collect();
        SystemStatus {
            coordinator_id: self.config.id.clone(),
            uptime_seconds: (now - self.started_at).num_seconds(),
            total_agents: agents.len(),
            responsive_agents,
            agents,
            active_commands,
            stats,
            recent_errors,
            generated_at: now,
        }
    }

    /// Remove terminal records older than the grace period. Responses that
    /// reference them are dropped from then on.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let grace = chrono::Duration::seconds(self.config.record_grace_seconds as i64);
        self.executions.lock().await.purge_expired(now, grace)
    }

    /// One maintenance pass. Returns the agents that went stale since the last pass.
    async fn maintain(&self, stale: &mut HashSet<String>, now: DateTime<Utc>) -> Vec<String> {
        let purged = self.purge_expired(now).await;
        if purged > 0 {
            debug!(purged, "Purged expired command records");
        }

        let current: HashSet<String> = self.registry.stale_agents(now).await.into_iter().collect();
        let mut newly_stale: Vec<String> = current.difference(stale).cloned().collect();
        newly_stale.sort();
        for id in &newly_stale {
            warn!(agent = %id, "Agent stopped sending heartbeats");
        }
        *stale = current;
        newly_stale
    }

    /// Periodic cleanup until cancelled.
    pub async fn run_maintenance(self: Arc<Self>, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.maintenance_interval_seconds.max(1));
        let mut stale = HashSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Maintenance loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.maintain(&mut stale, Utc::now()).await;
                }
            }
        }
    }

    /// Drain the command center's inbox until cancelled or closed.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        info!(id = %self.config.id, "Command center serving");
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = inbox.recv() => {
                    let Some(bytes) = received else { break };
                    let center = Arc::clone(&self);
                    tasks.spawn(async move {
                        if let Err(e) = center.handle_incoming(&bytes).await {
                            debug!(error = %e, "Inbound message rejected");
                        }
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Inbound handler panicked");
                    }
                }
            }
        }
        tasks.shutdown().await;
        info!(id = %self.config.id, "Command center stopped");
    }
}

fn numeric_entries<'a, I>(entries: I) -> BTreeMap<String, f64>
where
    I: Iterator<Item = (&'a String, &'a serde_json::Value)>,
{
    entries
        .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_protocol, RecordingSafetyMonitor, RecordingTransport};
    use quorum_models::agent::capability;
    use quorum_models::command::OutcomeStatus;

    fn center(
        transport: Arc<RecordingTransport>,
        safety: Arc<RecordingSafetyMonitor>,
    ) -> CommandCenter {
        CommandCenter::new(
            CommandCenterConfig::default(),
            Arc::new(test_protocol("command_center")),
            transport,
            safety,
        )
    }

    fn bot(id: &str) -> AgentInfo {
        AgentInfo::new(id, id.to_uppercase(), [capability::FORECAST])
    }

    #[tokio::test]
    async fn no_targets_sends_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        let result = center
            .execute_command(CommandKind::Forecast, DataMap::new(), None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CoordinationError::NoTargets)));
        assert!(transport.sent_messages().is_empty());
        assert_eq!(center.system_status().await.stats.issued, 0);
    }

    #[tokio::test]
    async fn unregistered_targets_are_skipped() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        let result = center
            .execute_command(
                CommandKind::Status,
                DataMap::new(),
                Some(vec!["ghost".to_string()]),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(CoordinationError::NoTargets)));
    }

    #[tokio::test]
    async fn unknown_action_fails_before_sending() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;
        transport.clear();

        let result = center
            .execute_action("launch", DataMap::new(), None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CoordinationError::UnknownCommand(ref a)) if a == "launch"));
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn register_sends_signed_ack() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        assert!(center.register_agent(bot("a")).await);

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a");
        assert_eq!(sent[0].1.payload.action, "status");
        assert!(sent[0].1.is_signed());
        assert_eq!(sent[0].1.payload.metadata["ack"], true);
    }

    #[tokio::test]
    async fn failed_ack_keeps_record() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_for("a");
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        assert!(!center.register_agent(bot("a")).await);
        assert!(center.registry().contains("a").await);
        assert!(center.unregister_agent("a").await);
        assert!(!center.unregister_agent("a").await);
    }

    #[tokio::test]
    async fn all_unreachable_ends_failed() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;
        center.register_agent(bot("b")).await;
        transport.fail_for("a");
        transport.fail_for("b");

        let outcome = center
            .execute_command(CommandKind::HealthCheck, DataMap::new(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures["a"].contains("unreachable"));
        assert_eq!(center.system_status().await.stats.failed, 1);
    }

    #[tokio::test]
    async fn silence_times_out_and_reports() {
        let transport = Arc::new(RecordingTransport::new());
        let safety = Arc::new(RecordingSafetyMonitor::new());
        let center = center(transport.clone(), safety.clone());
        center.register_agent(bot("a")).await;

        let outcome = center
            .execute_command(CommandKind::Forecast, DataMap::new(), None, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert_eq!(outcome.missing_agents, vec!["a".to_string()]);
        assert!(outcome.partial_results.unwrap().is_empty());

        let status = center.system_status().await;
        assert_eq!(status.stats.timed_out, 1);
        assert_eq!(status.active_commands, 0);
        assert_eq!(safety.conditions_of("command_timeout").len(), 1);
    }

    #[tokio::test]
    async fn stalled_send_still_times_out() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;
        center.register_agent(bot("b")).await;
        transport.stall_for("a");

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            center.execute_command(CommandKind::Forecast, DataMap::new(), None, Duration::from_millis(50)),
        )
        .await
        .expect("command outlived its deadline")
        .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert_eq!(outcome.missing_agents, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(center.system_status().await.active_commands, 0);
    }

    #[tokio::test]
    async fn huge_timeout_does_not_overflow() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;
        transport.fail_for("a");

        let outcome = center
            .execute_command(CommandKind::HealthCheck, DataMap::new(), None, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.failures["a"].contains("unreachable"));
    }

    #[tokio::test]
    async fn dropped_command_is_purged_after_deadline() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            center.execute_command(CommandKind::Forecast, DataMap::new(), None, Duration::from_secs(5)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(center.system_status().await.active_commands, 1);

        let grace = chrono::Duration::seconds(CommandCenterConfig::default().record_grace_seconds as i64);
        assert_eq!(center.purge_expired(Utc::now()).await, 0);
        let after = Utc::now() + chrono::Duration::seconds(5) + grace;
        assert_eq!(center.purge_expired(after).await, 1);
        assert_eq!(center.system_status().await.active_commands, 0);
    }

    #[tokio::test]
    async fn bad_signature_gets_error_reply() {
        let transport = Arc::new(RecordingTransport::new());
        let safety = Arc::new(RecordingSafetyMonitor::new());
        let center = center(transport.clone(), safety.clone());

        let forger = MessageProtocol::new(
            "bot-x",
            "command_center",
            &quorum_models::config::ProtocolConfig {
                secret_key: "wrong".to_string(),
                ..Default::default()
            },
        );
        let bytes = forger.encode(forger.create_heartbeat("online", None)).unwrap();
        let result = center.handle_incoming(&bytes).await;
        assert!(matches!(result, Err(CoordinationError::Signature(ref s)) if s == "bot-x"));

        let sent = transport.sent_messages();
        assert_eq!(sent[0].0, "bot-x");
        assert_eq!(sent[0].1.kind, MessageKind::Error);
        assert_eq!(safety.conditions_of("signature_failure").len(), 1);
    }

    #[tokio::test]
    async fn rejected_error_messages_are_not_answered() {
        let transport = Arc::new(RecordingTransport::new());
        let safety = Arc::new(RecordingSafetyMonitor::new());
        let center = center(transport.clone(), safety.clone());

        let forger = MessageProtocol::new(
            "bot-x",
            "command_center",
            &quorum_models::config::ProtocolConfig {
                secret_key: "wrong".to_string(),
                ..Default::default()
            },
        );
        let bytes = forger
            .encode(forger.create_error("command_center", "signature validation failed", None))
            .unwrap();
        let result = center.handle_incoming(&bytes).await;
        assert!(matches!(result, Err(CoordinationError::Signature(_))));
        assert_eq!(safety.conditions_of("signature_failure").len(), 1);

        let garbled = br#"{"source_agent": "bot-x", "kind": "error", "id": 1}"#;
        assert!(matches!(center.handle_incoming(garbled).await, Err(CoordinationError::Decode(_))));
        assert!(transport.sent_bytes().is_empty());
    }

    #[tokio::test]
    async fn garbage_replies_to_claimed_sender() {
        let transport = Arc::new(RecordingTransport::new());
        let safety = Arc::new(RecordingSafetyMonitor::new());
        let center = center(transport.clone(), safety.clone());

        let result = center
            .handle_incoming(br#"{"source_agent": "bot-7", "kind": 12}"#)
            .await;
        assert!(matches!(result, Err(CoordinationError::Decode(_))));
        assert_eq!(transport.sent_messages()[0].0, "bot-7");
        assert_eq!(safety.conditions_of("decode_failure").len(), 1);

        assert!(center.handle_incoming(b"\x00\x01").await.is_err());
        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_and_telemetry_update_registry() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("bot-1")).await;

        let agent = test_protocol("bot-1");
        let mut perf = serde_json::Map::new();
        perf.insert("win_rate".to_string(), serde_json::json!(0.58));
        let heartbeat = agent.encode(agent.create_heartbeat("busy", Some(perf))).unwrap();
        assert_eq!(center.handle_incoming(&heartbeat).await.unwrap(), MessageKind::Heartbeat);

        let telemetry = agent
            .encode(agent.create_telemetry([("sharpe".to_string(), 1.7)]))
            .unwrap();
        center.handle_incoming(&telemetry).await.unwrap();

        let record = center.registry().get("bot-1").await.unwrap();
        assert_eq!(record.status, AgentStatus::Busy);
        assert_eq!(record.performance["win_rate"], 0.58);
        assert_eq!(record.performance["sharpe"], 1.7);
    }

    #[tokio::test]
    async fn error_reports_are_bounded() {
        let transport = Arc::new(RecordingTransport::new());
        let center = CommandCenter::new(
            CommandCenterConfig {
                max_recent_errors: 2,
                ..CommandCenterConfig::default()
            },
            Arc::new(test_protocol("command_center")),
            transport,
            Arc::new(RecordingSafetyMonitor::new()),
        );
        let agent = test_protocol("bot-1");
        for reason in ["first", "second", "third"] {
            let bytes = agent
                .encode(agent.create_error("command_center", reason, None))
                .unwrap();
            center.handle_incoming(&bytes).await.unwrap();
        }
        let errors = center.system_status().await.recent_errors;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "second");
        assert_eq!(errors[1].message, "third");
    }

    #[tokio::test]
    async fn inbound_command_is_rejected() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        let agent = test_protocol("bot-1");
        let bytes = agent
            .encode(agent.create_command("command_center", CommandKind::Shutdown, DataMap::new(), DataMap::new()))
            .unwrap();
        assert_eq!(center.handle_incoming(&bytes).await.unwrap(), MessageKind::Command);
        let sent = transport.sent_messages();
        assert_eq!(sent[0].1.kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn broadcast_refans_to_everyone_but_sender() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        for id in ["a", "b", "c"] {
            center.register_agent(bot(id)).await;
        }
        transport.clear();

        let agent = test_protocol("a");
        let bytes = agent
            .encode(agent.create_broadcast("pattern_share", DataMap::new(), DataMap::new()))
            .unwrap();
        center.handle_incoming(&bytes).await.unwrap();

        let targets: Vec<String> = transport.sent_messages().into_iter().map(|(t, _)| t).collect();
        assert_eq!(targets, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(transport.sent_bytes()[0].1, bytes);
    }

    #[tokio::test]
    async fn maintenance_reports_newly_stale_once() {
        let transport = Arc::new(RecordingTransport::new());
        let center = center(transport.clone(), Arc::new(RecordingSafetyMonitor::new()));
        center.register_agent(bot("a")).await;

        let mut stale = HashSet::new();
        let later = Utc::now() + chrono::Duration::seconds(125);
        assert_eq!(center.maintain(&mut stale, later).await, vec!["a".to_string()]);
        assert!(center.maintain(&mut stale, later).await.is_empty());
        assert!(center.registry().contains("a").await);
    }
}
