//! Quorum: command-and-consensus coordination for a swarm of trading agents.
//!
//! A command center fans signed commands out to registered agents and gathers
//! their answers under a deadline; a cross-agent coordinator folds those
//! answers into one consensus forecast or one swarm-wide risk picture.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use quorum::models::config::QuorumConfig;
//! use quorum::agents::{CommandCenter, CrossAgentCoordinator, TracingSafetyMonitor};
//! use quorum::protocol::MessageProtocol;
//! ```

pub use quorum_agents as agents;
pub use quorum_models as models;
pub use quorum_protocol as protocol;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use quorum_agents::{
    AgentAdapter, AgentBackend, AgentNode, CommandCenter, CrossAgentCoordinator, LocalTransport,
    SafetyMonitor, SimulatedAgent,
};
use quorum_models::agent::BotProfile;
use quorum_models::config::{QuorumConfig, SimulatedAgentConfig};
use quorum_protocol::MessageProtocol;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything one coordination process owns, built once from configuration
/// and passed explicitly to whoever needs it.
pub struct CoordinationContext {
    pub config: QuorumConfig,
    pub transport: Arc<LocalTransport>,
    pub protocol: Arc<MessageProtocol>,
    pub center: Arc<CommandCenter>,
    pub coordinator: Arc<CrossAgentCoordinator>,
    pub safety: Arc<dyn SafetyMonitor>,
    cancel: CancellationToken,
}

/// Build the context and start the command center's inbox and maintenance loops.
pub async fn build_context(
    config: QuorumConfig,
    safety: Arc<dyn SafetyMonitor>,
) -> Result<CoordinationContext> {
    if config.protocol.require_signed && config.protocol.secret_key.is_empty() {
        bail!("protocol.secret_key must be set when signed messages are required");
    }

    let center_id = config.command_center.id.clone();
    let transport = Arc::new(LocalTransport::default());
    let protocol = Arc::new(MessageProtocol::new(
        center_id.as_str(),
        center_id.as_str(),
        &config.protocol,
    ));
    let center = Arc::new(CommandCenter::new(
        config.command_center.clone(),
        Arc::clone(&protocol),
        transport.clone(),
        Arc::clone(&safety),
    ));
    let coordinator = Arc::new(CrossAgentCoordinator::new(
        Arc::clone(&center),
        Arc::clone(&safety),
        config.coordinator.clone(),
    ));

    let cancel = CancellationToken::new();
    let inbox = transport.connect(&center_id).await;
    tokio::spawn(Arc::clone(&center).serve(inbox, cancel.clone()));
    tokio::spawn(Arc::clone(&center).run_maintenance(cancel.clone()));
    info!(id = %center_id, "Coordination context ready");

    Ok(CoordinationContext {
        config,
        transport,
        protocol,
        center,
        coordinator,
        safety,
        cancel,
    })
}

impl CoordinationContext {
    /// Start one in-process node per `[[simulation.agents]]` entry and
    /// register it with the command center and the coordinator.
    pub async fn spawn_simulated_swarm(&self) -> Vec<Arc<AgentNode>> {
        let mut nodes = Vec::with_capacity(self.config.simulation.agents.len());
        for agent in &self.config.simulation.agents {
            nodes.push(self.spawn_simulated(agent).await);
        }
        info!(agents = nodes.len(), "Simulated swarm started");
        nodes
    }

    async fn spawn_simulated(&self, agent: &SimulatedAgentConfig) -> Arc<AgentNode> {
        let adapter = AgentAdapter::from_backend(
            agent.id.as_str(),
            agent.name.as_str(),
            AgentBackend::Simulated(SimulatedAgent::new(agent)),
        );
        let info = adapter.info();
        let protocol = Arc::new(MessageProtocol::new(
            agent.id.as_str(),
            self.center.id(),
            &self.config.protocol,
        ));
        let inbox = self.transport.connect(&agent.id).await;
        let node = Arc::new(AgentNode::new(adapter, protocol, self.transport.clone()));

        tokio::spawn(Arc::clone(&node).run(inbox, self.cancel.clone()));
        let heartbeat = Duration::from_secs(self.config.simulation.heartbeat_interval_seconds.max(1));
        tokio::spawn(Arc::clone(&node).run_heartbeats(heartbeat, self.cancel.clone()));

        self.coordinator
            .register_bot(
                agent.id.as_str(),
                BotProfile {
                    capabilities: info.capabilities.clone(),
                    weight: agent.weight,
                    ..BotProfile::default()
                },
            )
            .await;
        self.center.register_agent(info).await;
        node
    }

    /// Stop every loop this context started.
    pub fn shutdown(&self) {
        info!("Coordination context shutting down");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_agents::test_support::{test_protocol_config, RecordingSafetyMonitor};
    use quorum_models::config::{ProtocolConfig, SimulationConfig};

    fn simulated(id: &str, seed: u64) -> SimulatedAgentConfig {
        SimulatedAgentConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            seed,
            bias: None,
            base_price: 100.0,
            symbols: vec!["BTCUSDT".to_string()],
            response_delay_ms: 0,
            weight: 1.0,
        }
    }

    fn config(agents: Vec<SimulatedAgentConfig>) -> QuorumConfig {
        QuorumConfig {
            protocol: test_protocol_config(),
            simulation: SimulationConfig {
                agents,
                ..SimulationConfig::default()
            },
            ..QuorumConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_secret_is_rejected() {
        let config = QuorumConfig {
            protocol: ProtocolConfig::default(),
            ..QuorumConfig::default()
        };
        let result = build_context(config, Arc::new(RecordingSafetyMonitor::new())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn simulated_swarm_answers_forecasts() {
        let context = build_context(
            config(vec![simulated("sim-1", 1), simulated("sim-2", 2), simulated("sim-3", 3)]),
            Arc::new(RecordingSafetyMonitor::new()),
        )
        .await
        .unwrap();
        let nodes = context.spawn_simulated_swarm().await;
        assert_eq!(nodes.len(), 3);

        let forecast = context
            .coordinator
            .execute_cross_forecast("BTCUSDT", "1h", None)
            .await
            .unwrap();
        assert_eq!(forecast.agent_forecasts.len(), 3);

        let metrics = context.coordinator.execute_risk_assessment(None).await.unwrap();
        assert_eq!(metrics.agents_assessed, 3);

        let status = context.center.system_status().await;
        assert_eq!(status.total_agents, 3);
        assert_eq!(status.stats.issued, 2);
        context.shutdown();
    }

    #[tokio::test]
    async fn unknown_symbol_gets_no_forecast() {
        let context = build_context(
            config(vec![simulated("sim-1", 1)]),
            Arc::new(RecordingSafetyMonitor::new()),
        )
        .await
        .unwrap();
        context.spawn_simulated_swarm().await;

        let result = context
            .coordinator
            .execute_cross_forecast("DOGEUSDT", "1h", None)
            .await;
        assert!(matches!(
            result,
            Err(quorum_agents::CoordinationError::NoResponses(_))
        ));
        context.shutdown();
    }
}
