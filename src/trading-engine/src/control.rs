//! Control plane.
//!
//! Exposes start/stop/pause/resume per component, configuration updates,
//! manual trade entry/exit, and an aggregated snapshot pushed to UI
//! subscribers at 2 Hz. Also owns the glue tasks that route market
//! updates into the strategies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use common::{Config, FeedClient, Side, TradingParams};

use crate::analyzer::{Opportunity, OpportunityAnalyzer};
use crate::cache::MarketCache;
use crate::gabagool::{GabagoolConfig, GabagoolEngine, GabagoolStats, PairPosition};
use crate::optimizer::{AutoOptimizer, OptimizerStatus};
use crate::scanner::{Scanner, ScannerStats};
use crate::trades::{CloseReason, OpenTradeParams, Trade, TradeManager, TradeStats};

/// Snapshot push rate: 2 Hz.
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);
/// Opportunities included in each snapshot.
const SNAPSHOT_TOP_N: usize = 10;
/// How often the scanner's priority set is synced from the strategy.
const PRIORITY_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Engine components addressable by control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Scanner,
    Gabagool,
    Trades,
    Optimizer,
}

/// Aggregated engine state for UI subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub timestamp: DateTime<Utc>,
    pub scanner: ScannerStats,
    pub opportunities: Vec<Opportunity>,
    pub gabagool: GabagoolStats,
    pub trades: TradeStats,
    pub optimizer: OptimizerStatus,
}

/// Manual trade entry request from the control surface.
#[derive(Debug, Clone)]
pub struct EnterTradeRequest {
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    /// `None` falls back to `position_timeout_seconds` from the params.
    pub timeout_seconds: Option<u64>,
}

pub struct ControlPlane {
    engine_config: Config,
    params_path: PathBuf,
    /// When false the scanner runs on REST refresh alone.
    use_ws: bool,

    cache: Arc<MarketCache>,
    scanner: Arc<Scanner>,
    analyzer: Arc<OpportunityAnalyzer>,
    gabagool: Arc<GabagoolEngine>,
    trades: Arc<TradeManager>,
    optimizer: Arc<AutoOptimizer>,

    snapshot_tx: broadcast::Sender<EngineSnapshot>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControlPlane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine_config: Config,
        use_ws: bool,
        cache: Arc<MarketCache>,
        scanner: Arc<Scanner>,
        analyzer: Arc<OpportunityAnalyzer>,
        gabagool: Arc<GabagoolEngine>,
        trades: Arc<TradeManager>,
        optimizer: Arc<AutoOptimizer>,
    ) -> Self {
        let params_path = engine_config.data_dir.join("trading_params.json");
        let (snapshot_tx, _) = broadcast::channel(16);
        let (shutdown, _) = watch::channel(false);
        Self {
            engine_config,
            params_path,
            use_ws,
            cache,
            scanner,
            analyzer,
            gabagool,
            trades,
            optimizer,
            snapshot_tx,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the 2 Hz snapshot stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Start every component plus the routing and snapshot tasks.
    pub async fn start_all(self: &Arc<Self>) -> anyhow::Result<()> {
        let feed = self.use_ws.then(|| FeedClient::new(&self.engine_config));
        Scanner::start(&self.scanner, feed)
            .await
            .context("scanner failed to start")?;

        self.gabagool.start().await;
        TradeManager::start_monitor(&self.trades).await;
        AutoOptimizer::start(&self.optimizer).await;

        let mut tasks = self.tasks.lock().await;

        // Market updates -> gabagool decision path
        {
            let gabagool = self.gabagool.clone();
            let mut rx = self.cache.subscribe();
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = rx.recv() => match received {
                            Ok(update) => {
                                gabagool.on_market_update(&update.data).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Gabagool driver lagged, skipped {} updates", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }));
        }

        // WS price events -> trade-manager exit path
        {
            let trades = self.trades.clone();
            let mut rx = self.cache.subscribe();
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = rx.recv() => match received {
                            Ok(update) => {
                                if let Some(price) = update.price {
                                    trades.on_price_update(&update.data.market.id, price).await;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Trade driver lagged, skipped {} updates", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }));
        }

        // Strategy's active positions -> scanner priority set
        {
            let gabagool = self.gabagool.clone();
            let scanner = self.scanner.clone();
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(PRIORITY_SYNC_INTERVAL) => {
                            scanner
                                .set_priority_markets(gabagool.active_position_ids().await)
                                .await;
                        }
                    }
                }
            }));
        }

        // Snapshot push at 2 Hz
        {
            let this = self.clone();
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(SNAPSHOT_INTERVAL) => {
                            let snapshot = this.snapshot().await;
                            let _ = this.snapshot_tx.send(snapshot);
                        }
                    }
                }
            }));
        }

        info!("All components started");
        Ok(())
    }

    /// Stop everything, then flush trade state to disk.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        {
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                let _ = task.await;
            }
        }

        self.optimizer.stop().await;
        self.trades.stop_monitor().await;
        self.gabagool.stop().await;
        self.scanner.stop().await;
        self.trades.flush().await;
        info!("Engine shut down");
    }

    pub async fn start_component(&self, component: Component) -> anyhow::Result<()> {
        match component {
            Component::Scanner => {
                let feed = self.use_ws.then(|| FeedClient::new(&self.engine_config));
                Scanner::start(&self.scanner, feed).await
            }
            Component::Gabagool => {
                self.gabagool.start().await;
                Ok(())
            }
            Component::Trades => {
                TradeManager::start_monitor(&self.trades).await;
                Ok(())
            }
            Component::Optimizer => {
                AutoOptimizer::start(&self.optimizer).await;
                Ok(())
            }
        }
    }

    pub async fn stop_component(&self, component: Component) {
        match component {
            Component::Scanner => self.scanner.stop().await,
            Component::Gabagool => self.gabagool.stop().await,
            Component::Trades => self.trades.stop_monitor().await,
            Component::Optimizer => self.optimizer.stop().await,
        }
    }

    pub async fn pause_component(&self, component: Component) {
        match component {
            Component::Scanner => self.scanner.pause().await,
            Component::Gabagool => self.gabagool.pause().await,
            Component::Trades => self.trades.stop_monitor().await,
            Component::Optimizer => self.optimizer.set_enabled(false),
        }
    }

    pub async fn resume_component(&self, component: Component) {
        match component {
            Component::Scanner => self.scanner.resume().await,
            Component::Gabagool => self.gabagool.resume().await,
            Component::Trades => TradeManager::start_monitor(&self.trades).await,
            Component::Optimizer => self.optimizer.set_enabled(true),
        }
    }

    /// Validate and apply new trading parameters. Invalid parameters are
    /// rejected and the previous configuration stays in effect. Returns
    /// the exposure warning, if any.
    pub async fn update_params(&self, params: TradingParams) -> anyhow::Result<Option<String>> {
        params.validate().map_err(|e| anyhow!(e))?;

        let warning = params.exposure_warning();
        if let Some(ref message) = warning {
            warn!("Trading params warning: {}", message);
        }

        if let Err(e) = params.save(&self.params_path) {
            warn!("Failed to persist trading params: {}", e);
        }
        self.analyzer.update_params(params).await;
        info!("Trading params updated");
        Ok(warning)
    }

    pub async fn params(&self) -> TradingParams {
        self.analyzer.params().await
    }

    /// Apply a new strategy configuration after sanity checks.
    pub async fn update_gabagool_config(&self, config: GabagoolConfig) -> anyhow::Result<()> {
        if config.max_pair_cost <= Decimal::ZERO || config.max_pair_cost >= Decimal::ONE {
            return Err(anyhow!("max_pair_cost must be in (0, 1)"));
        }
        if config.order_size_usd <= Decimal::ZERO || config.max_position_usd <= Decimal::ZERO {
            return Err(anyhow!("order and position sizes must be positive"));
        }
        if config.order_size_usd > config.max_position_usd {
            return Err(anyhow!("order_size_usd exceeds max_position_usd"));
        }
        self.gabagool.set_config(config).await;
        Ok(())
    }

    /// Open a manual trade on a tracked market.
    pub async fn enter_trade(&self, request: EnterTradeRequest) -> anyhow::Result<Trade> {
        let data = self
            .cache
            .get(&request.market_id)
            .await
            .ok_or_else(|| anyhow!("unknown market: {}", request.market_id))?;

        let params = self.analyzer.params().await;
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(params.position_timeout_seconds);

        let trade = self
            .trades
            .open_trade(OpenTradeParams {
                market_id: data.market.id.clone(),
                market_question: data.market.question.clone(),
                token_id: data.market.token_id(request.side).to_string(),
                side: request.side,
                entry_price: request.price,
                size: request.size,
                stop_loss: request.stop_loss,
                take_profit: request.take_profit,
                trailing_stop_pct: request.trailing_stop_pct,
                max_duration_seconds: timeout_seconds,
            })
            .await;
        Ok(trade)
    }

    /// Manually close a trade at the given price.
    pub async fn exit_trade(&self, trade_id: Uuid, price: Decimal) -> Option<Trade> {
        self.trades
            .close_trade(trade_id, price, CloseReason::Manual)
            .await
    }

    /// Current ranked opportunities.
    pub async fn list_opportunities(&self, limit: usize) -> Vec<Opportunity> {
        let markets = self.cache.markets().await;
        let mut opportunities = self.analyzer.analyze_all(markets.values()).await;
        opportunities.truncate(limit);
        opportunities
    }

    /// All pair positions held by the strategy.
    pub async fn list_positions(&self) -> Vec<PairPosition> {
        self.gabagool.positions().await
    }

    pub async fn list_trades(&self) -> Vec<Trade> {
        self.trades.all_trades().await
    }

    /// Aggregate engine state.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let opportunities = self.list_opportunities(SNAPSHOT_TOP_N).await;
        EngineSnapshot {
            timestamp: Utc::now(),
            scanner: self.scanner.stats().await,
            opportunities,
            gabagool: self.gabagool.stats().await,
            trades: self.trades.stats().await,
            optimizer: self.optimizer.status().await,
        }
    }
}
