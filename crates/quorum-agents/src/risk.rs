//! Aggregate risk across agents' self-reported books. Pure functions, no I/O.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use quorum_models::forecast::RiskLevel;
use quorum_models::portfolio::{PortfolioSnapshot, RiskMetrics};
use rust_decimal::prelude::ToPrimitive;

/// The five normalized inputs of the overall score, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskComponents {
    pub correlation: f64,
    pub concentration: f64,
    pub drawdown: f64,
    pub volatility: f64,
    pub leverage: f64,
}

const CORRELATION_WEIGHT: f64 = 0.25;
const CONCENTRATION_WEIGHT: f64 = 0.25;
const DRAWDOWN_WEIGHT: f64 = 0.20;
const VOLATILITY_WEIGHT: f64 = 0.15;
const LEVERAGE_WEIGHT: f64 = 0.15;

pub fn overall_score(c: &RiskComponents) -> f64 {
    CORRELATION_WEIGHT * c.correlation
        + CONCENTRATION_WEIGHT * c.concentration
        + DRAWDOWN_WEIGHT * c.drawdown
        + VOLATILITY_WEIGHT * c.volatility
        + LEVERAGE_WEIGHT * c.leverage
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn normalize(value: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    clamp_unit(value / reference)
}

/// Absolute notional exposure per symbol, summed across agents.
pub fn symbol_exposure(portfolios: &BTreeMap<String, PortfolioSnapshot>) -> BTreeMap<String, f64> {
    let mut exposure: BTreeMap<String, f64> = BTreeMap::new();
    for snapshot in portfolios.values() {
        for (symbol, position) in &snapshot.positions {
            let value = position.value.abs().to_f64().unwrap_or(0.0);
            *exposure.entry(symbol.clone()).or_default() += value;
        }
    }
    exposure
}

/// Fraction of all held symbols that every agent holds. A crude overlap
/// measure, not a statistical correlation.
pub fn symbol_overlap(portfolios: &BTreeMap<String, PortfolioSnapshot>) -> f64 {
    let books: Vec<BTreeSet<&String>> = portfolios
        .values()
        .map(|snapshot| {
            snapshot
                .positions
                .iter()
                .filter(|(_, position)| !position.size.is_zero())
                .map(|(symbol, _)| symbol)
                .collect()
        })
        .collect();

    let all: BTreeSet<&String> = books.iter().flatten().copied().collect();
    if all.is_empty() {
        return 0.0;
    }
    let common = all
        .iter()
        .filter(|symbol| books.iter().all(|book| book.contains(*symbol)))
        .count();
    common as f64 / all.len() as f64
}

pub fn risk_components(
    portfolios: &BTreeMap<String, PortfolioSnapshot>,
    leverage_reference: f64,
) -> RiskComponents {
    if portfolios.is_empty() {
        return RiskComponents::default();
    }

    let exposure = symbol_exposure(portfolios);
    let total: f64 = exposure.values().sum();
    let largest = exposure.values().copied().fold(0.0, f64::max);
    let concentration = if total > 0.0 { largest / total } else { 0.0 };

    let drawdown = portfolios
        .values()
        .map(|s| s.max_drawdown.abs())
        .fold(0.0, f64::max);
    let leverages: Vec<f64> = portfolios.values().map(|s| s.leverage.max(0.0)).collect();
    let mean_leverage = leverages.iter().sum::<f64>() / leverages.len() as f64;
    let max_leverage = leverages.iter().copied().fold(0.0, f64::max);

    RiskComponents {
        correlation: clamp_unit(symbol_overlap(portfolios)),
        concentration: clamp_unit(concentration),
        drawdown: clamp_unit(drawdown),
        volatility: normalize(mean_leverage, leverage_reference),
        leverage: normalize(max_leverage, leverage_reference),
    }
}

fn recommendations(
    components: &RiskComponents,
    level: RiskLevel,
    exposure: &BTreeMap<String, f64>,
) -> Vec<String> {
    let mut out = Vec::new();
    if components.correlation > 0.7 {
        out.push("Diversify: most symbols are held by every agent".to_string());
    }
    if components.concentration > 0.5 {
        let top = exposure
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(symbol, _)| symbol.as_str())
            .unwrap_or("one symbol");
        out.push(format!("Reduce concentration in {top}"));
    }
    if components.drawdown > 0.15 {
        out.push("Drawdown elevated: tighten stops and cut position sizes".to_string());
    }
    if components.volatility > 0.6 {
        out.push("Average leverage high: expect amplified volatility".to_string());
    }
    if components.leverage > 0.8 {
        out.push("Reduce leverage on the most levered agent".to_string());
    }
    if level >= RiskLevel::High {
        out.push(format!("Overall risk {level}: pause new entries"));
    }
    if out.is_empty() {
        out.push("Risk within limits".to_string());
    }
    out
}

/// `None` when no portfolio was supplied.
pub fn compute_risk_metrics(
    portfolios: &BTreeMap<String, PortfolioSnapshot>,
    leverage_reference: f64,
    now: DateTime<Utc>,
) -> Option<RiskMetrics> {
    if portfolios.is_empty() {
        return None;
    }
    let components = risk_components(portfolios, leverage_reference);
    let score = overall_score(&components);
    let level = RiskLevel::from_score(score);
    let exposure = symbol_exposure(portfolios);

    Some(RiskMetrics {
        portfolio_correlation: components.correlation,
        position_concentration: components.concentration,
        drawdown_risk: components.drawdown,
        volatility_exposure: components.volatility,
        leverage_risk: components.leverage,
        overall_score: score,
        risk_level: level,
        recommendations: recommendations(&components, level, &exposure),
        agents_assessed: portfolios.len(),
        computed_at: now,
    })
}
