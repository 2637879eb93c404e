//! Test support: recording fakes for the transport and safety seams, scripted
//! agent capabilities, and an in-process swarm harness.
//!
//! The fakes record everything they are handed so tests can assert on exactly
//! what went over the wire without running a real endpoint.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use quorum_models::agent::BotProfile;
use quorum_models::config::{CommandCenterConfig, CoordinatorConfig, ProtocolConfig};
use quorum_models::forecast::{AgentForecast, Signal};
use quorum_models::message::Message;
use quorum_models::portfolio::{PortfolioSnapshot, PositionSnapshot};
use quorum_protocol::MessageProtocol;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AgentAdapter, Forecastable, PortfolioReportable};
use crate::command_center::CommandCenter;
use crate::coordinator::CrossAgentCoordinator;
use crate::error::{AgentError, TransportError};
use crate::node::AgentNode;
use crate::safety::{SafetyMonitor, Severity};
use crate::transport::{LocalTransport, Transport};

pub const TEST_SECRET: &str = "quorum-test-secret";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn test_protocol_config() -> ProtocolConfig {
    ProtocolConfig {
        secret_key: TEST_SECRET.to_string(),
        ..ProtocolConfig::default()
    }
}

/// Signed protocol for `agent_id` reporting to `command_center`.
pub fn test_protocol(agent_id: &str) -> MessageProtocol {
    MessageProtocol::new(agent_id, "command_center", &test_protocol_config())
}

/// A forecast around a 100.0 entry with a 2.5 risk-reward.
pub fn sample_forecast(signal: Signal, confidence: f64) -> AgentForecast {
    AgentForecast {
        signal,
        confidence,
        entry_price: Decimal::new(100, 0),
        stop_loss: Decimal::new(98, 0),
        take_profit: Decimal::new(105, 0),
        risk_ratio: 2.5,
        position_size: 0.05,
    }
}

/// Transport that records every send instead of delivering it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `target` fail with `UnknownEndpoint` from now on.
    pub fn fail_for(&self, target: &str) {
        lock(&self.failing).insert(target.to_string());
    }

    /// Sends to `target` never complete from now on.
    pub fn stall_for(&self, target: &str) {
        lock(&self.stalled).insert(target.to_string());
    }

    pub fn sent_bytes(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.sent).clone()
    }

    /// Every successful send, decoded. Panics on undecodable bytes.
    pub fn sent_messages(&self) -> Vec<(String, Message)> {
        lock(&self.sent)
            .iter()
            .map(|(target, bytes)| {
                let message = quorum_protocol::deserialize(bytes)
                    .unwrap_or_else(|e| panic!("recorded bytes do not decode: {e}"));
                (target.clone(), message)
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, target: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        if lock(&self.failing).contains(target) {
            return Err(TransportError::UnknownEndpoint(target.to_string()));
        }
        let stalled = lock(&self.stalled).contains(target);
        if stalled {
            std::future::pending::<()>().await;
        }
        lock(&self.sent).push((target.to_string(), bytes));
        Ok(())
    }
}

/// One `report_condition` call.
#[derive(Debug, Clone)]
pub struct ReportedCondition {
    pub kind: String,
    pub component: String,
    pub severity: Severity,
    pub description: String,
    pub metrics: serde_json::Value,
}

#[derive(Default)]
pub struct RecordingSafetyMonitor {
    conditions: Mutex<Vec<ReportedCondition>>,
}

impl RecordingSafetyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> Vec<ReportedCondition> {
        lock(&self.conditions).clone()
    }

    pub fn conditions_of(&self, kind: &str) -> Vec<ReportedCondition> {
        self.conditions()
            .into_iter()
            .filter(|c| c.kind == kind)
            .collect()
    }
}

impl SafetyMonitor for RecordingSafetyMonitor {
    fn report_condition(
        &self,
        kind: &str,
        component: &str,
        severity: Severity,
        description: &str,
        metrics: serde_json::Value,
    ) {
        lock(&self.conditions).push(ReportedCondition {
            kind: kind.to_string(),
            component: component.to_string(),
            severity,
            description: description.to_string(),
            metrics,
        });
    }
}

/// Forecaster that always answers with the same forecast, optionally after a delay.
pub struct ScriptedForecaster {
    forecast: AgentForecast,
    delay: Duration,
}

impl ScriptedForecaster {
    pub fn new(forecast: AgentForecast) -> Self {
        Self {
            forecast,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Forecastable for ScriptedForecaster {
    async fn forecast(&self, _symbol: &str, _timeframe: &str) -> Result<AgentForecast, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.forecast.clone())
    }
}

pub struct ScriptedPortfolio(pub PortfolioSnapshot);

impl ScriptedPortfolio {
    /// A book holding `symbols`, each position worth `value`.
    pub fn holding(symbols: &[&str], value: i64, leverage: f64, max_drawdown: f64) -> Self {
        let positions = symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.to_string(),
                    PositionSnapshot {
                        size: Decimal::ONE,
                        value: Decimal::new(value, 0),
                        pnl: Decimal::ZERO,
                    },
                )
            })
            .collect();
        Self(PortfolioSnapshot {
            total_value: Decimal::new(value * symbols.len() as i64, 0),
            positions,
            leverage,
            margin_used: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            max_drawdown,
        })
    }
}

#[async_trait]
impl PortfolioReportable for ScriptedPortfolio {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, AgentError> {
        Ok(self.0.clone())
    }
}

/// A command center, coordinator and agent nodes wired over a [`LocalTransport`].
pub struct Swarm {
    pub transport: Arc<LocalTransport>,
    pub center: Arc<CommandCenter>,
    pub coordinator: CrossAgentCoordinator,
    pub safety: Arc<RecordingSafetyMonitor>,
    pub nodes: Vec<Arc<AgentNode>>,
    silent: Vec<mpsc::Receiver<Vec<u8>>>,
    cancel: CancellationToken,
}

impl Swarm {
    /// Start the command center's inbox loop.
    pub async fn start(config: CommandCenterConfig, coordinator: CoordinatorConfig) -> Self {
        Self::with_inbox_capacity(config, coordinator, 256).await
    }

    /// Like [`start`](Self::start) with every endpoint's inbox bounded to `capacity`.
    pub async fn with_inbox_capacity(
        config: CommandCenterConfig,
        coordinator: CoordinatorConfig,
        capacity: usize,
    ) -> Self {
        let transport = Arc::new(LocalTransport::new(capacity));
        let safety = Arc::new(RecordingSafetyMonitor::new());
        let protocol = Arc::new(MessageProtocol::new(
            config.id.as_str(),
            config.id.as_str(),
            &test_protocol_config(),
        ));
        let inbox = transport.connect(&config.id).await;
        let center = Arc::new(CommandCenter::new(
            config,
            protocol,
            transport.clone(),
            safety.clone(),
        ));
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&center).serve(inbox, cancel.clone()));

        let coordinator =
            CrossAgentCoordinator::new(Arc::clone(&center), safety.clone(), coordinator);
        Self {
            transport,
            center,
            coordinator,
            safety,
            nodes: Vec::new(),
            silent: Vec::new(),
            cancel,
        }
    }

    /// Connect and run a node for `adapter` signing with `protocol`, without
    /// registering it.
    pub async fn attach(&self, adapter: AgentAdapter, protocol: &ProtocolConfig) -> Arc<AgentNode> {
        let id = adapter.id().to_string();
        let inbox = self.transport.connect(&id).await;
        let node = Arc::new(AgentNode::new(
            adapter,
            Arc::new(MessageProtocol::new(id.as_str(), self.center.id(), protocol)),
            self.transport.clone(),
        ));
        tokio::spawn(Arc::clone(&node).run(inbox, self.cancel.clone()));
        node
    }

    /// Connect and run a node for `adapter`, then register it with `weight`.
    pub async fn add_agent(&mut self, adapter: AgentAdapter, weight: f64) -> Arc<AgentNode> {
        let id = adapter.id().to_string();
        let info = adapter.info();
        let node = self.attach(adapter, &test_protocol_config()).await;

        self.coordinator
            .register_bot(
                id.as_str(),
                BotProfile {
                    capabilities: info.capabilities.clone(),
                    weight,
                    ..BotProfile::default()
                },
            )
            .await;
        self.center.register_agent(info).await;
        self.nodes.push(Arc::clone(&node));
        node
    }

    /// Register an agent whose endpoint accepts messages but never answers.
    pub async fn add_silent(&mut self, adapter: AgentAdapter) {
        let inbox = self.transport.connect(adapter.id()).await;
        self.silent.push(inbox);
        self.center.register_agent(adapter.info()).await;
    }

    /// Protocol an outside participant would use to talk to the command center.
    pub fn peer_protocol(&self, id: &str) -> MessageProtocol {
        MessageProtocol::new(id, self.center.id(), &test_protocol_config())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Swarm {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
