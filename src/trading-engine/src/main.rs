//! Trading engine binary.
//!
//! Wires the market data plane (scanner + cache + feed) to the decision
//! components (analyzer, gabagool, trade manager, auto-optimizer) under
//! the control plane, then runs until interrupted.

mod analyzer;
mod cache;
mod control;
mod gabagool;
mod optimizer;
mod scanner;
mod trades;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use common::{ClobRestClient, Config, TradingParams, VolatilityFeed};

use crate::analyzer::OpportunityAnalyzer;
use crate::cache::MarketCache;
use crate::control::ControlPlane;
use crate::gabagool::{GabagoolConfig, GabagoolEngine};
use crate::optimizer::{AutoOptimizer, OptimizerMode};
use crate::scanner::{Scanner, ScannerConfig};
use crate::trades::TradeManager;

/// Prediction-market trading engine
#[derive(Parser, Debug)]
#[command(name = "trading-engine")]
#[command(about = "Scans binary markets and runs the pair-arbitrage strategy")]
struct Args {
    /// Evaluate strategies without placing orders
    #[arg(long)]
    dry_run: bool,

    /// Optimizer mode
    #[arg(long, value_enum, default_value = "full-auto")]
    optimizer_mode: OptimizerMode,

    /// Disable the WebSocket feed (REST refresh only)
    #[arg(long)]
    no_ws: bool,

    /// Override the data directory from the environment
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Disable automatic stop-loss / take-profit defaults
    #[arg(long)]
    no_auto_sl_tp: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let args = Args::parse();

    info!("Trading engine starting...");

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let params_path = config.data_dir.join("trading_params.json");
    let params = match TradingParams::load(&params_path) {
        Ok(params) => params,
        Err(e) => {
            warn!("Failed to load trading params ({}), using defaults", e);
            TradingParams::default()
        }
    };

    // A gateway that cannot be constructed is fatal: refuse to start.
    let gateway = Arc::new(ClobRestClient::new(&config).context("failed to initialize gateway")?);
    info!("Gateway initialized: {}", config.api_url);

    let cache = Arc::new(MarketCache::new());

    let scanner = Arc::new(Scanner::new(
        gateway.clone(),
        cache.clone(),
        ScannerConfig {
            scan_interval: Duration::from_secs_f64(config.scan_interval_secs),
            markets_refresh_interval: Duration::from_secs(config.markets_refresh_secs),
            keywords: config.keywords.clone(),
            ..ScannerConfig::default()
        },
    ));

    let analyzer = Arc::new(OpportunityAnalyzer::new(params));
    let gabagool = Arc::new(GabagoolEngine::new(
        gateway.clone(),
        GabagoolConfig::default(),
        args.dry_run,
    ));
    let trades = Arc::new(TradeManager::new(
        gateway.clone(),
        config.data_dir.join("trades.json"),
        !args.no_auto_sl_tp,
    ));
    let volatility = Arc::new(VolatilityFeed::new(&config));
    let optimizer = Arc::new(AutoOptimizer::new(
        cache.clone(),
        gabagool.clone(),
        scanner.clone(),
        volatility,
        args.optimizer_mode,
    ));

    if args.dry_run {
        info!("Dry-run mode: orders will not be sent to the exchange");
    }

    let control = Arc::new(ControlPlane::new(
        config,
        !args.no_ws,
        cache,
        scanner,
        analyzer,
        gabagool,
        trades,
        optimizer,
    ));
    control.start_all().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Interrupt received, shutting down...");
    control.shutdown().await;

    Ok(())
}
