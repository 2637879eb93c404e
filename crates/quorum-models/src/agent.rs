use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Well-known capability names an agent may declare.
pub mod capability {
    pub const FORECAST: &str = "forecast";
    pub const TUNE: &str = "tune";
    pub const TRADE: &str = "trade";
    pub const PORTFOLIO: &str = "portfolio";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Online,
    Offline,
    Busy,
    Error,
    Maintenance,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(AgentStatus::Online),
            "offline" => Some(AgentStatus::Offline),
            "busy" => Some(AgentStatus::Busy),
            "error" => Some(AgentStatus::Error),
            "maintenance" => Some(AgentStatus::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent declares about itself when it registers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub capabilities: BTreeSet<String>,
    /// Transport-level details (address, version, ...).
    #[serde(default)]
    pub connection: BTreeMap<String, String>,
}

impl AgentInfo {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            connection: BTreeMap::new(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Registry entry for a known agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub capabilities: BTreeSet<String>,
    /// Most recently reported performance metrics.
    pub performance: BTreeMap<String, f64>,
    pub connection: BTreeMap<String, String>,
    /// Latency of the last response this agent delivered.
    pub last_response_ms: Option<u64>,
}

impl AgentRecord {
    /// Registration counts as the first sign of life.
    pub fn from_info(info: AgentInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: info.id,
            name: info.name,
            status: AgentStatus::Online,
            last_heartbeat: now,
            registered_at: now,
            capabilities: info.capabilities,
            performance: BTreeMap::new(),
            connection: info.connection,
            last_response_ms: None,
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    pub fn is_responsive(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.heartbeat_age(now) <= threshold
    }
}

/// Coordinator-side metadata about a bot, used for weighting its opinions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotProfile {
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Free-form label, e.g. "conservative" or "aggressive".
    #[serde(default = "default_risk_profile")]
    pub risk_profile: String,
    /// Multiplier applied to this bot's confidence when averaging price levels.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for BotProfile {
    fn default() -> Self {
        Self {
            capabilities: BTreeSet::new(),
            risk_profile: default_risk_profile(),
            weight: default_weight(),
        }
    }
}

fn default_risk_profile() -> String {
    "balanced".to_string()
}

fn default_weight() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_info_starts_online() {
        let now = Utc::now();
        let info = AgentInfo::new("bot-1", "Momentum", [capability::FORECAST]);
        let record = AgentRecord::from_info(info, now);
        assert_eq!(record.status, AgentStatus::Online);
        assert_eq!(record.last_heartbeat, now);
        assert!(record.capabilities.contains("forecast"));
    }

    #[test]
    fn responsiveness_follows_heartbeat_age() {
        let now = Utc::now();
        let record = AgentRecord::from_info(AgentInfo::new("bot-1", "A", ["forecast"]), now);
        let threshold = Duration::seconds(120);
        assert!(record.is_responsive(now + Duration::seconds(119), threshold));
        assert!(!record.is_responsive(now + Duration::seconds(125), threshold));
    }

    #[test]
    fn status_parse() {
        assert_eq!(AgentStatus::parse("BUSY"), Some(AgentStatus::Busy));
        assert_eq!(AgentStatus::parse("maintenance"), Some(AgentStatus::Maintenance));
        assert_eq!(AgentStatus::parse("sleeping"), None);
    }

    #[test]
    fn bot_profile_defaults_from_toml() {
        let profile: BotProfile = toml::from_str(r#"capabilities = ["forecast"]"#).unwrap();
        assert_eq!(profile.weight, 1.0);
        assert_eq!(profile.risk_profile, "balanced");
    }
}
