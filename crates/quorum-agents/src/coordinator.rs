use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quorum_models::agent::BotProfile;
use quorum_models::command::{CommandKind, CommandOutcome};
use quorum_models::config::CoordinatorConfig;
use quorum_models::forecast::{AgentForecast, CrossBotForecast, RiskLevel};
use quorum_models::message::DataMap;
use quorum_models::portfolio::{PortfolioSnapshot, RiskMetrics};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::command_center::CommandCenter;
use crate::consensus::build_cross_forecast;
use crate::error::{AgentError, CoordinationError};
use crate::parser::{parse_forecast, parse_portfolio};
use crate::risk::compute_risk_metrics;
use crate::safety::{SafetyMonitor, Severity};

const COMPONENT: &str = "cross_agent_coordinator";

/// Turns per-agent answers gathered by the [`CommandCenter`] into one
/// consensus forecast or one swarm-wide risk picture.
pub struct CrossAgentCoordinator {
    center: Arc<CommandCenter>,
    safety: Arc<dyn SafetyMonitor>,
    config: CoordinatorConfig,
    profiles: RwLock<BTreeMap<String, BotProfile>>,
    latest: RwLock<HashMap<(String, String), CrossBotForecast>>,
}

impl CrossAgentCoordinator {
    pub fn new(
        center: Arc<CommandCenter>,
        safety: Arc<dyn SafetyMonitor>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            center,
            safety,
            config,
            profiles: RwLock::new(BTreeMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn center(&self) -> &Arc<CommandCenter> {
        &self.center
    }

    /// Local bookkeeping only; nothing is sent.
    pub async fn register_bot(&self, id: impl Into<String>, profile: BotProfile) {
        let id = id.into();
        debug!(bot = %id, weight = profile.weight, risk_profile = %profile.risk_profile, "Bot profile registered");
        self.profiles.write().await.insert(id, profile);
    }

    pub async fn profile(&self, id: &str) -> Option<BotProfile> {
        self.profiles.read().await.get(id).cloned()
    }

    async fn profile_weights(&self) -> BTreeMap<String, f64> {
        self.profiles
            .read()
            .await
            .iter()
            .map(|(id, profile)| (id.clone(), profile.weight))
            .collect()
    }

    /// Ask the targets for a forecast and fold the answers into a consensus.
    /// Partial results from a timed-out command are used as-is.
    pub async fn execute_cross_forecast(
        &self,
        symbol: &str,
        timeframe: &str,
        targets: Option<Vec<String>>,
    ) -> Result<CrossBotForecast, CoordinationError> {
        let mut data = DataMap::new();
        data.insert("symbol".to_string(), serde_json::json!(symbol));
        data.insert("timeframe".to_string(), serde_json::json!(timeframe));

        let outcome = self
            .center
            .execute_command(
                CommandKind::Forecast,
                data,
                targets,
                Duration::from_secs(self.config.forecast_timeout_seconds),
            )
            .await?;

        let forecasts: BTreeMap<String, AgentForecast> = collect_answers(&outcome, parse_forecast);
        let weights = self.profile_weights().await;
        let forecast = build_cross_forecast(symbol, timeframe, forecasts, &weights, Utc::now())
            .ok_or_else(|| CoordinationError::NoResponses(CommandKind::Forecast.to_string()))?;

        info!(
            symbol,
            timeframe,
            agents = forecast.agent_forecasts.len(),
            consensus = ?forecast.consensus_level,
            signal = ?forecast.consensus_signal,
            risk = %forecast.risk_level,
            action = ?forecast.recommended_action.action,
            "Cross-agent forecast"
        );

        self.latest.write().await.insert(
            (symbol.to_string(), timeframe.to_string()),
            forecast.clone(),
        );
        Ok(forecast)
    }

    /// Most recent consensus computed for this symbol and timeframe.
    pub async fn latest_forecast(&self, symbol: &str, timeframe: &str) -> Option<CrossBotForecast> {
        self.latest
            .read()
            .await
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
    }

    /// Query every target's portfolio and score the combined book.
    pub async fn execute_risk_assessment(
        &self,
        targets: Option<Vec<String>>,
    ) -> Result<RiskMetrics, CoordinationError> {
        let mut data = DataMap::new();
        data.insert("query".to_string(), serde_json::json!("portfolio"));

        let outcome = self
            .center
            .execute_command(
                CommandKind::Status,
                data,
                targets,
                Duration::from_secs(self.config.risk_timeout_seconds),
            )
            .await?;

        let portfolios: BTreeMap<String, PortfolioSnapshot> =
            collect_answers(&outcome, parse_portfolio);
        let metrics = compute_risk_metrics(
            &portfolios,
            self.config.high_leverage_reference,
            Utc::now(),
        )
        .ok_or_else(|| CoordinationError::NoResponses("portfolio".to_string()))?;

        info!(
            agents = metrics.agents_assessed,
            score = metrics.overall_score,
            level = %metrics.risk_level,
            "Portfolio risk assessed"
        );

        let severity = match metrics.risk_level {
            RiskLevel::Critical => Some(Severity::Critical),
            RiskLevel::High => Some(Severity::High),
            RiskLevel::Low | RiskLevel::Medium => None,
        };
        if let Some(severity) = severity {
            self.safety.report_condition(
                "portfolio_risk",
                COMPONENT,
                severity,
                &format!(
                    "combined portfolio risk {} (score {:.2})",
                    metrics.risk_level, metrics.overall_score
                ),
                serde_json::json!({
                    "overall_score": metrics.overall_score,
                    "correlation": metrics.portfolio_correlation,
                    "concentration": metrics.position_concentration,
                    "drawdown": metrics.drawdown_risk,
                    "volatility": metrics.volatility_exposure,
                    "leverage": metrics.leverage_risk,
                    "recommendations": metrics.recommendations,
                }),
            );
        }
        Ok(metrics)
    }
}

/// Successful answers that parse; anything else is treated as absent data.
fn collect_answers<T>(
    outcome: &CommandOutcome,
    parse: fn(&serde_json::Value) -> Result<T, AgentError>,
) -> BTreeMap<String, T> {
    outcome
        .answered()
        .iter()
        .filter(|(agent, body)| {
            if !body.success {
                debug!(agent = %agent, error = ?body.error, "Agent declined");
            }
            body.success
        })
        .filter_map(|(agent, body)| match parse(&body.result) {
            Ok(value) => Some((agent.clone(), value)),
            Err(e) => {
                warn!(agent = %agent, error = %e, "Discarding unparseable answer");
                None
            }
        })
        .collect()
}
