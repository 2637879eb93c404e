use serde::{Deserialize, Serialize};

use crate::forecast::Signal;

/// Top-level configuration for a coordination process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuorumConfig {
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub command_center: CommandCenterConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Message signing configuration shared by every participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Shared HMAC key.
    pub secret_key: String,
    /// Reject unsigned messages. Only test setups turn this off.
    #[serde(default = "default_true")]
    pub require_signed: bool,
    /// When set, reject reused nonces and signatures older than this many seconds.
    #[serde(default)]
    pub replay_window_seconds: Option<u64>,
    /// Upper bound on remembered nonces when the replay window is enabled.
    #[serde(default = "default_replay_capacity")]
    pub replay_cache_capacity: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            require_signed: true,
            replay_window_seconds: None,
            replay_cache_capacity: default_replay_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandCenterConfig {
    /// Endpoint id of the command center on the transport.
    #[serde(default = "default_center_id")]
    pub id: String,
    #[serde(default = "default_command_timeout")]
    pub default_timeout_seconds: u64,
    /// Heartbeat age after which an agent is reported non-responsive.
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold_seconds: u64,
    /// How long terminal command records stay matchable before removal.
    #[serde(default = "default_record_grace")]
    pub record_grace_seconds: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_seconds: u64,
    #[serde(default = "default_max_recent_errors")]
    pub max_recent_errors: usize,
}

impl Default for CommandCenterConfig {
    fn default() -> Self {
        Self {
            id: default_center_id(),
            default_timeout_seconds: default_command_timeout(),
            liveness_threshold_seconds: default_liveness_threshold(),
            record_grace_seconds: default_record_grace(),
            maintenance_interval_seconds: default_maintenance_interval(),
            max_recent_errors: default_max_recent_errors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default = "default_command_timeout")]
    pub forecast_timeout_seconds: u64,
    #[serde(default = "default_command_timeout")]
    pub risk_timeout_seconds: u64,
    /// Leverage treated as fully risky when normalizing.
    #[serde(default = "default_high_leverage")]
    pub high_leverage_reference: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            forecast_timeout_seconds: default_command_timeout(),
            risk_timeout_seconds: default_command_timeout(),
            high_leverage_reference: default_high_leverage(),
        }
    }
}

/// In-process agents spun up by the `quorum` binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default)]
    pub agents: Vec<SimulatedAgentConfig>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedAgentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub seed: u64,
    /// Signal the agent leans toward, if any.
    #[serde(default)]
    pub bias: Option<Signal>,
    #[serde(default = "default_base_price")]
    pub base_price: f64,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub response_delay_ms: u64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_true() -> bool {
    true
}
fn default_replay_capacity() -> u64 {
    100_000
}
fn default_center_id() -> String {
    "command_center".to_string()
}
fn default_command_timeout() -> u64 {
    30
}
fn default_liveness_threshold() -> u64 {
    120
}
fn default_record_grace() -> u64 {
    300
}
fn default_maintenance_interval() -> u64 {
    30
}
fn default_max_recent_errors() -> usize {
    50
}
fn default_high_leverage() -> f64 {
    3.0
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_base_price() -> f64 {
    100.0
}
fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}
fn default_weight() -> f64 {
    1.0
}
