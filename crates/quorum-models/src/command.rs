use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{DataMap, ResponseBody};

/// Typed instruction understood by agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Forecast,
    Tune,
    Status,
    ConfigUpdate,
    PatternShare,
    MlSync,
    HealthCheck,
    Shutdown,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::Forecast,
        CommandKind::Tune,
        CommandKind::Status,
        CommandKind::ConfigUpdate,
        CommandKind::PatternShare,
        CommandKind::MlSync,
        CommandKind::HealthCheck,
        CommandKind::Shutdown,
    ];

    /// Wire name used as the payload action.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Forecast => "forecast",
            CommandKind::Tune => "tune",
            CommandKind::Status => "status",
            CommandKind::ConfigUpdate => "config_update",
            CommandKind::PatternShare => "pattern_share",
            CommandKind::MlSync => "ml_sync",
            CommandKind::HealthCheck => "health_check",
            CommandKind::Shutdown => "shutdown",
        }
    }

    /// Accepts the wire name as well as the camelCase spelling older agents send.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "forecast" => Some(CommandKind::Forecast),
            "tune" => Some(CommandKind::Tune),
            "status" => Some(CommandKind::Status),
            "configupdate" => Some(CommandKind::ConfigUpdate),
            "patternshare" => Some(CommandKind::PatternShare),
            "mlsync" => Some(CommandKind::MlSync),
            "healthcheck" => Some(CommandKind::HealthCheck),
            "shutdown" => Some(CommandKind::Shutdown),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    TimedOut,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::TimedOut | CommandStatus::Failed
        )
    }

    fn can_transition_to(&self, next: CommandStatus) -> bool {
        match (self, next) {
            (CommandStatus::Pending, CommandStatus::Executing) => true,
            (CommandStatus::Pending, CommandStatus::Failed) => true,
            (CommandStatus::Executing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Live bookkeeping for one fanned-out command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandExecution {
    pub id: Uuid,
    pub kind: CommandKind,
    /// Target agents in the order they were resolved.
    pub targets: Vec<String>,
    /// Id of the message sent to each target; responses must reference it.
    pub dispatched: BTreeMap<String, Uuid>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CommandStatus,
    pub responses: BTreeMap<String, ResponseBody>,
    /// Agents that settled without a response (unreachable, malformed reply).
    pub failures: BTreeMap<String, String>,
    pub metadata: DataMap,
}

impl CommandExecution {
    pub fn new(
        kind: CommandKind,
        targets: Vec<String>,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
        metadata: DataMap,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            targets,
            dispatched: BTreeMap::new(),
            started_at,
            deadline,
            finished_at: None,
            status: CommandStatus::Pending,
            responses: BTreeMap::new(),
            failures: BTreeMap::new(),
            metadata,
        }
    }

    /// Move to `next` if the state machine allows it. Terminal states are final.
    pub fn transition(&mut self, next: CommandStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    pub fn is_target(&self, agent_id: &str) -> bool {
        self.targets.iter().any(|t| t == agent_id)
    }

    pub fn has_settled(&self, agent_id: &str) -> bool {
        self.responses.contains_key(agent_id) || self.failures.contains_key(agent_id)
    }

    /// Every target has either answered or failed.
    pub fn is_settled(&self) -> bool {
        self.targets.iter().all(|t| self.has_settled(t))
    }

    pub fn missing_agents(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| !self.has_settled(t))
            .cloned()
            .collect()
    }

    /// Record an agent's response. Returns false if the record no longer accepts it.
    pub fn record_response(&mut self, agent_id: &str, body: ResponseBody) -> bool {
        if self.status != CommandStatus::Executing
            || !self.is_target(agent_id)
            || self.has_settled(agent_id)
        {
            return false;
        }
        self.responses.insert(agent_id.to_string(), body);
        true
    }

    pub fn record_failure(&mut self, agent_id: &str, reason: impl Into<String>) -> bool {
        if self.status != CommandStatus::Executing
            || !self.is_target(agent_id)
            || self.has_settled(agent_id)
        {
            return false;
        }
        self.failures.insert(agent_id.to_string(), reason.into());
        true
    }

    /// Close the record once every target has settled.
    pub fn finish_if_settled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != CommandStatus::Executing || !self.is_settled() {
            return false;
        }
        let next = if self.responses.is_empty() {
            CommandStatus::Failed
        } else {
            CommandStatus::Completed
        };
        self.transition(next, now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every target answered.
    Succeeded,
    /// Some targets answered; see `missing_agents` and `failures`.
    Partial,
    /// Nothing usable came back.
    Failed,
}

/// What `execute_command` hands back to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOutcome {
    pub command_id: Uuid,
    pub kind: CommandKind,
    pub success: bool,
    pub status: OutcomeStatus,
    pub results: BTreeMap<String, ResponseBody>,
    /// Responses collected before the deadline, present only on timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_results: Option<BTreeMap<String, ResponseBody>>,
    pub missing_agents: Vec<String>,
    pub failures: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl CommandOutcome {
    pub fn from_execution(record: &CommandExecution, execution_time_ms: u64) -> Self {
        let missing_agents = record.missing_agents();
        let answered = !record.responses.is_empty();
        match record.status {
            CommandStatus::Completed => Self {
                command_id: record.id,
                kind: record.kind,
                success: true,
                status: if record.failures.is_empty() {
                    OutcomeStatus::Succeeded
                } else {
                    OutcomeStatus::Partial
                },
                results: record.responses.clone(),
                partial_results: None,
                missing_agents,
                failures: record.failures.clone(),
                error: None,
                execution_time_ms,
            },
            CommandStatus::TimedOut => Self {
                command_id: record.id,
                kind: record.kind,
                success: false,
                status: if answered {
                    OutcomeStatus::Partial
                } else {
                    OutcomeStatus::Failed
                },
                results: BTreeMap::new(),
                partial_results: Some(record.responses.clone()),
                missing_agents,
                failures: record.failures.clone(),
                error: Some("timeout".to_string()),
                execution_time_ms,
            },
            CommandStatus::Failed | CommandStatus::Pending | CommandStatus::Executing => Self {
                command_id: record.id,
                kind: record.kind,
                success: false,
                status: OutcomeStatus::Failed,
                results: BTreeMap::new(),
                partial_results: None,
                missing_agents,
                failures: record.failures.clone(),
                error: Some("all targets unreachable".to_string()),
                execution_time_ms,
            },
        }
    }

    /// Every response that came back, whether the command completed or timed out.
    pub fn answered(&self) -> &BTreeMap<String, ResponseBody> {
        match &self.partial_results {
            Some(partial) => partial,
            None => &self.results,
        }
    }
}

/// Cumulative counters over every command the center has issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandStats {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Running mean of completed command execution times.
    pub avg_response_time_ms: f64,
}

impl CommandStats {
    pub fn record_issued(&mut self) {
        self.issued += 1;
    }

    pub fn record_outcome(&mut self, outcome: &CommandOutcome) {
        if outcome.success {
            self.succeeded += 1;
            let n = self.succeeded as f64;
            self.avg_response_time_ms +=
                (outcome.execution_time_ms as f64 - self.avg_response_time_ms) / n;
        } else {
            self.failed += 1;
            if outcome.error.as_deref() == Some("timeout") {
                self.timed_out += 1;
            }
        }
    }
}
