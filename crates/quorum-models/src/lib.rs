pub mod agent;
pub mod command;
pub mod config;
pub mod forecast;
pub mod message;
pub mod portfolio;
pub mod status;

pub use agent::{capability, AgentInfo, AgentRecord, AgentStatus, BotProfile};
pub use command::{
    CommandExecution, CommandKind, CommandOutcome, CommandStats, CommandStatus, OutcomeStatus,
};
pub use config::{
    CommandCenterConfig, CoordinatorConfig, ProtocolConfig, QuorumConfig, SimulatedAgentConfig,
    SimulationConfig,
};
pub use forecast::{
    AgentForecast, ConsensusLevel, CrossBotForecast, RecommendedAction, RiskLevel, Signal,
    TradeAction,
};
pub use message::{
    DataMap, Message, MessageKind, Payload, ResponseBody, SecurityBlock, BROADCAST_TARGET,
};
pub use portfolio::{PortfolioSnapshot, PositionSnapshot, RiskMetrics};
pub use status::{AgentStatusView, ErrorReport, SystemStatus};
