use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentStatus;
use crate::command::CommandStats;

/// Read-only view of one agent inside [`SystemStatus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatusView {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub responsive: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub heartbeat_age_seconds: i64,
    pub capabilities: BTreeSet<String>,
    pub last_response_ms: Option<u64>,
}

/// An `error` message an agent sent to the command center.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    pub agent_id: String,
    pub message: String,
    pub original_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStatus {
    pub coordinator_id: String,
    pub uptime_seconds: i64,
    pub total_agents: usize,
    pub responsive_agents: usize,
    pub agents: Vec<AgentStatusView>,
    pub active_commands: usize,
    pub stats: CommandStats,
    pub recent_errors: Vec<ErrorReport>,
    pub generated_at: DateTime<Utc>,
}
