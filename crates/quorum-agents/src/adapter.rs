//! Agent-side capability interfaces and the two concrete agent variants.
//!
//! An [`AgentAdapter`] either has a capability or it does not; the declared
//! capability set sent on registration is derived from what is present.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quorum_models::agent::{capability, AgentInfo};
use quorum_models::config::SimulatedAgentConfig;
use quorum_models::forecast::{AgentForecast, Signal};
use quorum_models::message::DataMap;
use quorum_models::portfolio::{PortfolioSnapshot, PositionSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::AgentError;

/// Answers `forecast` commands.
#[async_trait]
pub trait Forecastable: Send + Sync {
    async fn forecast(&self, symbol: &str, timeframe: &str) -> Result<AgentForecast, AgentError>;
}

/// Answers portfolio queries.
#[async_trait]
pub trait PortfolioReportable: Send + Sync {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, AgentError>;
}

/// Answers `tune` commands with whatever the agent applied.
#[async_trait]
pub trait Tunable: Send + Sync {
    async fn tune(&self, params: &DataMap) -> Result<serde_json::Value, AgentError>;
}

/// Where a live agent gets its trading signals.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn latest_signal(&self, symbol: &str, timeframe: &str)
        -> Result<AgentForecast, AgentError>;
}

/// The exchange account a live agent trades through.
#[async_trait]
pub trait ExchangeAccount: Send + Sync {
    async fn snapshot(&self) -> Result<PortfolioSnapshot, AgentError>;
}

pub struct AgentAdapter {
    id: String,
    name: String,
    forecaster: Option<Arc<dyn Forecastable>>,
    portfolio: Option<Arc<dyn PortfolioReportable>>,
    tuner: Option<Arc<dyn Tunable>>,
    extra_capabilities: BTreeSet<String>,
}

impl AgentAdapter {
    /// An adapter with no capabilities. Add them with the `with_*` builders.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            forecaster: None,
            portfolio: None,
            tuner: None,
            extra_capabilities: BTreeSet::new(),
        }
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn Forecastable>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    pub fn with_portfolio(mut self, portfolio: Arc<dyn PortfolioReportable>) -> Self {
        self.portfolio = Some(portfolio);
        self
    }

    pub fn with_tuner(mut self, tuner: Arc<dyn Tunable>) -> Self {
        self.tuner = Some(tuner);
        self
    }

    /// Declare a capability that has no interface here, e.g. `trade`.
    pub fn with_capability(mut self, name: impl Into<String>) -> Self {
        self.extra_capabilities.insert(name.into());
        self
    }

    /// Build from one of the two concrete variants.
    pub fn from_backend(id: impl Into<String>, name: impl Into<String>, backend: AgentBackend) -> Self {
        let adapter = Self::new(id, name);
        match backend {
            AgentBackend::Simulated(agent) => {
                let agent = Arc::new(agent);
                adapter
                    .with_forecaster(agent.clone())
                    .with_portfolio(agent.clone())
                    .with_tuner(agent)
            }
            AgentBackend::Live(agent) => {
                let agent = Arc::new(agent);
                adapter
                    .with_forecaster(agent.clone())
                    .with_portfolio(agent)
                    .with_capability(capability::TRADE)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn forecaster(&self) -> Option<&Arc<dyn Forecastable>> {
        self.forecaster.as_ref()
    }

    pub fn portfolio(&self) -> Option<&Arc<dyn PortfolioReportable>> {
        self.portfolio.as_ref()
    }

    pub fn tuner(&self) -> Option<&Arc<dyn Tunable>> {
        self.tuner.as_ref()
    }

    pub fn capabilities(&self) -> BTreeSet<String> {
        let mut caps = self.extra_capabilities.clone();
        if self.forecaster.is_some() {
            caps.insert(capability::FORECAST.to_string());
        }
        if self.portfolio.is_some() {
            caps.insert(capability::PORTFOLIO.to_string());
        }
        if self.tuner.is_some() {
            caps.insert(capability::TUNE.to_string());
        }
        caps
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo::new(self.id.clone(), self.name.clone(), self.capabilities())
    }
}

/// The agent variant, chosen once at construction.
pub enum AgentBackend {
    Simulated(SimulatedAgent),
    Live(LiveAgent),
}

fn to_price(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO).round_dp(2)
}

/// Deterministic pseudo-random agent for tests and local runs. The same seed
/// and call sequence always yields the same answers.
pub struct SimulatedAgent {
    rng: Mutex<StdRng>,
    bias: Option<Signal>,
    base_price: f64,
    symbols: Vec<String>,
    response_delay: Duration,
    params: Mutex<DataMap>,
}

impl SimulatedAgent {
    pub fn new(config: &SimulatedAgentConfig) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            bias: config.bias,
            base_price: config.base_price,
            symbols: config.symbols.clone(),
            response_delay: Duration::from_millis(config.response_delay_ms),
            params: Mutex::new(DataMap::new()),
        }
    }

    /// Default settings with the given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            bias: None,
            base_price: 100.0,
            symbols: Vec::new(),
            response_delay: Duration::ZERO,
            params: Mutex::new(DataMap::new()),
        }
    }

    pub fn with_bias(mut self, bias: Signal) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Currently applied tuning parameters.
    pub fn params(&self) -> Result<DataMap, AgentError> {
        self.params
            .lock()
            .map(|p| p.clone())
            .map_err(|e| AgentError::Unavailable(format!("params lock poisoned: {e}")))
    }

    async fn pause(&self) {
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> Result<T, AgentError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| AgentError::Unavailable(format!("rng lock poisoned: {e}")))?;
        Ok(f(&mut rng))
    }

    fn draw_forecast(&self, rng: &mut StdRng) -> AgentForecast {
        let signal = match self.bias {
            Some(bias) if rng.gen_bool(0.7) => bias,
            _ => match rng.gen_range(0..3) {
                0 => Signal::Buy,
                1 => Signal::Sell,
                _ => Signal::Hold,
            },
        };
        let confidence = rng.gen_range(0.45..0.95);
        let entry = self.base_price * (1.0 + rng.gen_range(-0.02..0.02));
        let risk = entry * rng.gen_range(0.01..0.03);
        let risk_ratio = rng.gen_range(1.2..3.0);
        let (stop, target) = match signal {
            Signal::Buy => (entry - risk, entry + risk * risk_ratio),
            Signal::Sell => (entry + risk, entry - risk * risk_ratio),
            Signal::Hold => (entry - risk, entry + risk),
        };
        AgentForecast {
            signal,
            confidence,
            entry_price: to_price(entry),
            stop_loss: to_price(stop),
            take_profit: to_price(target),
            risk_ratio,
            position_size: rng.gen_range(0.01..0.1),
        }
    }

    fn draw_portfolio(&self, rng: &mut StdRng) -> PortfolioSnapshot {
        let mut positions = BTreeMap::new();
        let mut exposure = 0.0;
        for symbol in &self.symbols {
            if rng.gen_bool(0.25) {
                continue;
            }
            let size = rng.gen_range(0.1..2.0);
            let value = size * self.base_price;
            exposure += value;
            positions.insert(
                symbol.clone(),
                PositionSnapshot {
                    size: to_price(size),
                    value: to_price(value),
                    pnl: to_price(value * rng.gen_range(-0.05..0.05)),
                },
            );
        }
        let leverage = rng.gen_range(0.5..3.0);
        let total_value = (exposure / leverage).max(self.base_price);
        PortfolioSnapshot {
            total_value: to_price(total_value),
            positions,
            leverage,
            margin_used: to_price(exposure / leverage),
            daily_pnl: to_price(total_value * rng.gen_range(-0.03..0.03)),
            max_drawdown: rng.gen_range(0.0..0.2),
        }
    }
}

#[async_trait]
impl Forecastable for SimulatedAgent {
    async fn forecast(&self, symbol: &str, _timeframe: &str) -> Result<AgentForecast, AgentError> {
        self.pause().await;
        if !self.symbols.is_empty() && !self.symbols.iter().any(|s| s == symbol) {
            return Err(AgentError::Unsupported(format!("symbol {symbol}")));
        }
        self.with_rng(|rng| self.draw_forecast(rng))
    }
}

#[async_trait]
impl PortfolioReportable for SimulatedAgent {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, AgentError> {
        self.pause().await;
        self.with_rng(|rng| self.draw_portfolio(rng))
    }
}

#[async_trait]
impl Tunable for SimulatedAgent {
    async fn tune(&self, params: &DataMap) -> Result<serde_json::Value, AgentError> {
        self.pause().await;
        let mut current = self
            .params
            .lock()
            .map_err(|e| AgentError::Unavailable(format!("params lock poisoned: {e}")))?;
        current.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(serde_json::json!({
            "applied": params.keys().collect::<Vec<_>>(),
            "params": *current,
        }))
    }
}

/// An agent backed by a real signal source and exchange account.
pub struct LiveAgent {
    signals: Arc<dyn SignalSource>,
    account: Arc<dyn ExchangeAccount>,
}

impl LiveAgent {
    pub fn new(signals: Arc<dyn SignalSource>, account: Arc<dyn ExchangeAccount>) -> Self {
        Self { signals, account }
    }
}

#[async_trait]
impl Forecastable for LiveAgent {
    async fn forecast(&self, symbol: &str, timeframe: &str) -> Result<AgentForecast, AgentError> {
        let forecast = self.signals.latest_signal(symbol, timeframe).await?;
        if !(0.0..=1.0).contains(&forecast.confidence) {
            return Err(AgentError::Parse(format!(
                "signal source returned confidence {}",
                forecast.confidence
            )));
        }
        Ok(forecast)
    }
}

#[async_trait]
impl PortfolioReportable for LiveAgent {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, AgentError> {
        self.account.snapshot().await
    }
}
