use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        })
    }
}

/// A single agent's answer to a `forecast` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentForecast {
    pub signal: Signal,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Reward over risk for this setup.
    pub risk_ratio: f64,
    /// Fraction of the agent's capital it would commit.
    pub position_size: f64,
}

/// How much the agents agree. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLevel {
    Disagreement,
    Weak,
    Moderate,
    Strong,
}

/// Discretized risk. Ordered from lowest to highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Number of qualitative risk factors present → level.
    pub fn from_factor_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::Low,
            1 => RiskLevel::Medium,
            2 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Weighted overall score → level, cut at 0.4 / 0.6 / 0.8.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Scale applied to the recommended position size.
    pub fn position_multiplier(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 0.8,
            RiskLevel::High => 0.5,
            RiskLevel::Critical => 0.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    /// Confidence too low to act yet.
    Wait,
    /// Risk too high to act at all.
    Avoid,
}

impl From<Signal> for TradeAction {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Buy => TradeAction::Buy,
            Signal::Sell => TradeAction::Sell,
            Signal::Hold => TradeAction::Hold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedAction {
    pub action: TradeAction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_size: f64,
}

/// Consensus derived from a set of independently computed forecasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossBotForecast {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    /// The per-agent forecasts that fed this consensus.
    pub agent_forecasts: BTreeMap<String, AgentForecast>,
    pub consensus_level: ConsensusLevel,
    pub consensus_signal: Signal,
    pub signal_agreement: f64,
    pub confidence_mean: f64,
    pub confidence_std_dev: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub recommended_action: RecommendedAction,
}
