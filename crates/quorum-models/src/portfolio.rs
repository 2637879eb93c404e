use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::forecast::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSnapshot {
    pub size: Decimal,
    /// Notional value of the position.
    pub value: Decimal,
    pub pnl: Decimal,
}

/// An agent's self-reported book, as answered to a portfolio query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    #[serde(default)]
    pub positions: BTreeMap<String, PositionSnapshot>,
    pub leverage: f64,
    pub margin_used: Decimal,
    pub daily_pnl: Decimal,
    /// Fraction of peak equity, e.g. 0.12 for a 12% drawdown.
    pub max_drawdown: f64,
}

/// Aggregate risk across several agents' books. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskMetrics {
    pub portfolio_correlation: f64,
    pub position_concentration: f64,
    pub drawdown_risk: f64,
    pub volatility_exposure: f64,
    pub leverage_risk: f64,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub agents_assessed: usize,
    pub computed_at: DateTime<Utc>,
}
