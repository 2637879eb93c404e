//! Consensus math over a set of agent forecasts. Pure functions, no I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quorum_models::forecast::{
    AgentForecast, ConsensusLevel, CrossBotForecast, RecommendedAction, RiskLevel, Signal,
    TradeAction,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Preference order when two signals draw the same number of votes.
const TIE_BREAK_ORDER: [Signal; 3] = [Signal::Hold, Signal::Buy, Signal::Sell];

const SPREAD_LIMIT: f64 = 0.3;
const EXPOSURE_LIMIT: f64 = 0.3;
const MIN_RISK_REWARD: f64 = 1.5;
const MIN_ACTIONABLE_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalTally {
    pub counts: BTreeMap<Signal, usize>,
    pub majority: Signal,
    /// Share of forecasts voting for `majority`.
    pub agreement: f64,
    pub total: usize,
}

/// Count votes per signal. `None` for an empty input.
pub fn tally_signals<'a, I>(forecasts: I) -> Option<SignalTally>
where
    I: IntoIterator<Item = &'a AgentForecast>,
{
    let mut counts: BTreeMap<Signal, usize> = BTreeMap::new();
    let mut total = 0usize;
    for forecast in forecasts {
        *counts.entry(forecast.signal).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return None;
    }

    let mut majority = TIE_BREAK_ORDER[0];
    let mut best = 0usize;
    for signal in TIE_BREAK_ORDER {
        let count = counts.get(&signal).copied().unwrap_or(0);
        if count > best {
            best = count;
            majority = signal;
        }
    }

    Some(SignalTally {
        counts,
        majority,
        agreement: best as f64 / total as f64,
        total,
    })
}

/// Mean and population standard deviation. Both zero for an empty slice.
pub fn confidence_stats(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// First match wins: strong, moderate, weak, disagreement.
pub fn classify_consensus(agreement: f64, std_dev: f64) -> ConsensusLevel {
    if agreement >= 0.8 && std_dev < 0.10 {
        ConsensusLevel::Strong
    } else if agreement >= 0.6 && std_dev < 0.15 {
        ConsensusLevel::Moderate
    } else if agreement >= 0.4 {
        ConsensusLevel::Weak
    } else {
        ConsensusLevel::Disagreement
    }
}

/// Qualitative risk factors present in a set of forecasts, and the level their count maps to.
pub fn assess_consensus_risk(
    forecasts: &[&AgentForecast],
    level: ConsensusLevel,
) -> (RiskLevel, Vec<String>) {
    let mut factors = Vec::new();

    let confidences: Vec<f64> = forecasts.iter().map(|f| f.confidence).collect();
    if let (Some(max), Some(min)) = (
        confidences.iter().copied().reduce(f64::max),
        confidences.iter().copied().reduce(f64::min),
    ) {
        let spread = max - min;
        if spread > SPREAD_LIMIT {
            factors.push(format!("confidence spread {spread:.2} exceeds {SPREAD_LIMIT:.2}"));
        }
    }

    let exposure: f64 = forecasts.iter().map(|f| f.position_size).sum();
    if exposure > EXPOSURE_LIMIT {
        factors.push(format!(
            "combined position exposure {exposure:.2} exceeds {EXPOSURE_LIMIT:.2}"
        ));
    }

    if !forecasts.is_empty() {
        let mean_rr =
            forecasts.iter().map(|f| f.risk_ratio).sum::<f64>() / forecasts.len() as f64;
        if mean_rr < MIN_RISK_REWARD {
            factors.push(format!(
                "mean risk-reward {mean_rr:.2} below {MIN_RISK_REWARD:.2}"
            ));
        }
    }

    if matches!(level, ConsensusLevel::Weak | ConsensusLevel::Disagreement) {
        factors.push(format!("consensus is {}", consensus_label(level)));
    }

    (RiskLevel::from_factor_count(factors.len()), factors)
}

fn consensus_label(level: ConsensusLevel) -> &'static str {
    match level {
        ConsensusLevel::Strong => "strong",
        ConsensusLevel::Moderate => "moderate",
        ConsensusLevel::Weak => "weak",
        ConsensusLevel::Disagreement => "in disagreement",
    }
}

/// Price levels averaged with weight `confidence * profile_weight`; equal
/// weights when every such product is zero.
pub fn recommend_action(
    weighted: &[(f64, &AgentForecast)],
    majority: Signal,
    confidence_mean: f64,
    risk: RiskLevel,
) -> RecommendedAction {
    let raw: Vec<f64> = weighted
        .iter()
        .map(|(weight, f)| (f.confidence * weight).max(0.0))
        .collect();
    let weights: Vec<f64> = if raw.iter().sum::<f64>() > 0.0 {
        raw
    } else {
        vec![1.0; weighted.len()]
    };
    let total_weight: f64 = weights.iter().sum();

    let average = |pick: fn(&AgentForecast) -> Decimal| -> Decimal {
        if total_weight <= 0.0 {
            return Decimal::ZERO;
        }
        let mut sum = Decimal::ZERO;
        for ((_, forecast), weight) in weighted.iter().zip(&weights) {
            let share = Decimal::from_f64(weight / total_weight).unwrap_or(Decimal::ZERO);
            sum += pick(forecast) * share;
        }
        sum.round_dp(8)
    };

    let mean_size = if total_weight > 0.0 {
        weighted
            .iter()
            .zip(&weights)
            .map(|((_, f), w)| f.position_size * w)
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };

    let action = if risk == RiskLevel::Critical {
        TradeAction::Avoid
    } else if confidence_mean < MIN_ACTIONABLE_CONFIDENCE {
        TradeAction::Wait
    } else {
        TradeAction::from(majority)
    };

    RecommendedAction {
        action,
        entry_price: average(|f| f.entry_price),
        stop_loss: average(|f| f.stop_loss),
        take_profit: average(|f| f.take_profit),
        position_size: mean_size * risk.position_multiplier(),
    }
}

/// Derive a consensus from per-agent forecasts. Agents missing from
/// `profile_weights` weigh 1.0. `None` when no forecast was supplied.
pub fn build_cross_forecast(
    symbol: &str,
    timeframe: &str,
    forecasts: BTreeMap<String, AgentForecast>,
    profile_weights: &BTreeMap<String, f64>,
    now: DateTime<Utc>,
) -> Option<CrossBotForecast> {
    let tally = tally_signals(forecasts.values())?;
    let confidences: Vec<f64> = forecasts.values().map(|f| f.confidence).collect();
    let (confidence_mean, confidence_std_dev) = confidence_stats(&confidences);
    let consensus_level = classify_consensus(tally.agreement, confidence_std_dev);

    let contributors: Vec<&AgentForecast> = forecasts.values().collect();
    let (risk_level, risk_factors) = assess_consensus_risk(&contributors, consensus_level);

    let weighted: Vec<(f64, &AgentForecast)> = forecasts
        .iter()
        .map(|(agent, f)| (profile_weights.get(agent).copied().unwrap_or(1.0), f))
        .collect();
    let recommended_action =
        recommend_action(&weighted, tally.majority, confidence_mean, risk_level);

    Some(CrossBotForecast {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        timestamp: now,
        consensus_level,
        consensus_signal: tally.majority,
        signal_agreement: tally.agreement,
        confidence_mean,
        confidence_std_dev,
        risk_level,
        risk_factors,
        recommended_action,
        agent_forecasts: forecasts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn forecast(signal: Signal, confidence: f64) -> AgentForecast {
        AgentForecast {
            signal,
            confidence,
            entry_price: dec!(100),
            stop_loss: dec!(95),
            take_profit: dec!(110),
            risk_ratio: 2.0,
            position_size: 0.05,
        }
    }

    #[test]
    fn tally_majority_and_agreement() {
        let forecasts = [
            forecast(Signal::Buy, 0.9),
            forecast(Signal::Buy, 0.85),
            forecast(Signal::Sell, 0.5),
        ];
        let tally = tally_signals(&forecasts).unwrap();
        assert_eq!(tally.majority, Signal::Buy);
        assert!((tally.agreement - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(tally.total, 3);
    }

    #[test]
    fn ties_break_toward_hold_then_buy() {
        let buy_sell = [forecast(Signal::Sell, 0.7), forecast(Signal::Buy, 0.7)];
        assert_eq!(tally_signals(&buy_sell).unwrap().majority, Signal::Buy);

        let three_way = [
            forecast(Signal::Sell, 0.7),
            forecast(Signal::Buy, 0.7),
            forecast(Signal::Hold, 0.7),
        ];
        assert_eq!(tally_signals(&three_way).unwrap().majority, Signal::Hold);
    }

    #[test]
    fn empty_tally_is_none() {
        let none: [AgentForecast; 0] = [];
        assert!(tally_signals(&none).is_none());
    }

    #[test]
    fn population_std_dev() {
        let (mean, std) = confidence_stats(&[0.9, 0.85, 0.5]);
        assert!((mean - 0.75).abs() < 1e-12);
        assert!((std - 0.1780).abs() < 1e-3);
        assert_eq!(confidence_stats(&[]), (0.0, 0.0));
        assert_eq!(confidence_stats(&[0.4]), (0.4, 0.0));
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify_consensus(1.0, 0.05), ConsensusLevel::Strong);
        assert_eq!(classify_consensus(0.8, 0.12), ConsensusLevel::Moderate);
        assert_eq!(classify_consensus(2.0 / 3.0, 0.178), ConsensusLevel::Weak);
        assert_eq!(classify_consensus(0.39, 0.0), ConsensusLevel::Disagreement);
    }

    #[test]
    fn classification_monotone_in_agreement() {
        for std in [0.0, 0.05, 0.099, 0.1, 0.12, 0.149, 0.15, 0.3, 1.0] {
            let mut previous = ConsensusLevel::Disagreement;
            for step in 0..=100 {
                let agreement = step as f64 / 100.0;
                let level = classify_consensus(agreement, std);
                assert!(level >= previous, "agreement={agreement} std={std}");
                previous = level;
            }
        }
    }

    #[test]
    fn weak_consensus_scenario() {
        let mut forecasts = BTreeMap::new();
        forecasts.insert("a".to_string(), forecast(Signal::Buy, 0.9));
        forecasts.insert("b".to_string(), forecast(Signal::Buy, 0.85));
        forecasts.insert("c".to_string(), forecast(Signal::Sell, 0.5));

        let result =
            build_cross_forecast("BTCUSDT", "1h", forecasts, &BTreeMap::new(), Utc::now()).unwrap();
        assert_eq!(result.consensus_signal, Signal::Buy);
        assert_eq!(result.consensus_level, ConsensusLevel::Weak);
        assert!((result.confidence_mean - 0.75).abs() < 1e-12);
        assert!((result.confidence_std_dev - 0.178).abs() < 1e-3);
        assert_eq!(result.agent_forecasts.len(), 3);
        // Spread 0.40 and weak consensus.
        assert_eq!(result.risk_factors.len(), 2);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.recommended_action.action, TradeAction::Buy);
        assert_eq!(result.recommended_action.entry_price, dec!(100));
    }

    #[test]
    fn all_risk_factors_make_critical_and_avoid() {
        let risky = AgentForecast {
            risk_ratio: 0.8,
            position_size: 0.2,
            ..forecast(Signal::Buy, 0.95)
        };
        let other = AgentForecast {
            signal: Signal::Sell,
            confidence: 0.3,
            ..risky.clone()
        };
        let contributors = [&risky, &other];
        let (level, factors) = assess_consensus_risk(&contributors, ConsensusLevel::Weak);
        assert_eq!(factors.len(), 4);
        assert_eq!(level, RiskLevel::Critical);

        let weighted = [(1.0, &risky), (1.0, &other)];
        let action = recommend_action(&weighted, Signal::Hold, 0.9, level);
        assert_eq!(action.action, TradeAction::Avoid);
        assert!((action.position_size - 0.2 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn low_confidence_waits() {
        let a = forecast(Signal::Sell, 0.4);
        let action = recommend_action(&[(1.0, &a)], Signal::Sell, 0.4, RiskLevel::Low);
        assert_eq!(action.action, TradeAction::Wait);
    }

    #[test]
    fn prices_weighted_by_confidence_and_profile() {
        let high = AgentForecast {
            entry_price: dec!(200),
            ..forecast(Signal::Buy, 0.8)
        };
        let low = AgentForecast {
            entry_price: dec!(100),
            ..forecast(Signal::Buy, 0.8)
        };
        // Profile weights 3:1 with equal confidence → 175.
        let action = recommend_action(&[(3.0, &high), (1.0, &low)], Signal::Buy, 0.8, RiskLevel::Low);
        assert_eq!(action.entry_price, dec!(175));
        assert!((action.position_size - 0.05).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_fall_back_to_equal() {
        let a = AgentForecast {
            entry_price: dec!(10),
            ..forecast(Signal::Hold, 0.0)
        };
        let b = AgentForecast {
            entry_price: dec!(20),
            ..forecast(Signal::Hold, 0.0)
        };
        let action = recommend_action(&[(1.0, &a), (1.0, &b)], Signal::Hold, 0.0, RiskLevel::Low);
        assert_eq!(action.entry_price, dec!(15));
    }
}
