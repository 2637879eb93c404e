use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quorum_agents::TracingSafetyMonitor;
use quorum_models::config::QuorumConfig;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quorum", about = "Command-and-consensus coordination for trading agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/quorum.toml")]
    config: String,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask every agent for a forecast and print the consensus
    Forecast {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "1h")]
        timeframe: String,
    },
    /// Score the combined portfolio risk across agents
    Risk,
    /// Print the command center's system status
    Status,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays pure JSON (respects RUST_LOG)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: QuorumConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

    let context = quorum::build_context(config, Arc::new(TracingSafetyMonitor))
        .await
        .context("Failed to build coordination context")?;
    context.spawn_simulated_swarm().await;

    let result = match &cli.command {
        Command::Forecast { symbol, timeframe } => {
            let forecast = context
                .coordinator
                .execute_cross_forecast(symbol, timeframe, None)
                .await
                .map_err(|e| anyhow::anyhow!("Forecast failed: {e}"));
            forecast.and_then(|f| print_json(&f, cli.pretty))
        }
        Command::Risk => {
            let metrics = context
                .coordinator
                .execute_risk_assessment(None)
                .await
                .map_err(|e| anyhow::anyhow!("Risk assessment failed: {e}"));
            metrics.and_then(|m| print_json(&m, cli.pretty))
        }
        Command::Status => print_json(&context.center.system_status().await, cli.pretty),
    };

    context.shutdown();
    result
}
