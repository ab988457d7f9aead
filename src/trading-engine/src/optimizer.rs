//! Auto-optimizer - dynamic retuning of strategy parameters.
//!
//! Every few seconds, snapshots market conditions (spreads, volume,
//! liquidity, external volatility, position state) and derives a target
//! strategy configuration from per-field rules. In FULL_AUTO the target
//! is applied when a field moves more than 1%; in SEMI_AUTO it is only
//! published as suggestions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::VolatilityFeed;

use crate::cache::MarketCache;
use crate::gabagool::{GabagoolConfig, GabagoolEngine};
use crate::scanner::Scanner;

/// Optimization loop interval.
const UPDATE_INTERVAL: Duration = Duration::from_secs(5);
/// Relative change below which a field is left untouched.
const APPLY_THRESHOLD: f64 = 0.01;
/// Retained optimization events.
const MAX_EVENTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMode {
    /// Parameters are fixed.
    Manual,
    /// Suggestions are published but not applied.
    SemiAuto,
    /// Changes above the threshold are applied automatically.
    FullAuto,
}

/// Snapshot of current market conditions.
#[derive(Debug, Clone, Serialize)]
pub struct MarketConditions {
    pub avg_spread: Decimal,
    pub avg_volume: Decimal,
    pub avg_liquidity: Decimal,
    /// 0-100 from the external feed.
    pub volatility_score: f64,
    pub active_positions: usize,
    pub locked_positions: usize,
    /// Mean pair cost across active positions.
    pub avg_pair_cost: Decimal,
    pub ws_connected: bool,
    pub timestamp: DateTime<Utc>,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            avg_spread: dec!(0.10),
            avg_volume: dec!(20000),
            avg_liquidity: dec!(10000),
            volatility_score: 50.0,
            active_positions: 0,
            locked_positions: 0,
            avg_pair_cost: Decimal::ONE,
            ws_connected: false,
            timestamp: Utc::now(),
        }
    }
}

/// A recorded parameter change.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationEvent {
    pub timestamp: DateTime<Utc>,
    pub param: String,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
}

/// A pending suggestion in SEMI_AUTO mode.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub param: String,
    pub current: f64,
    pub suggested: f64,
    pub change_pct: f64,
}

/// Optimizer status for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStatus {
    pub mode: OptimizerMode,
    pub enabled: bool,
    pub running: bool,
    pub last_applied: Option<DateTime<Utc>>,
    pub total_adjustments: u64,
    pub conditions: Option<MarketConditions>,
    pub suggested: GabagoolConfig,
    pub recent_events: Vec<OptimizationEvent>,
}

/// Compute the target configuration for the observed conditions.
pub fn compute_target(c: &MarketConditions) -> GabagoolConfig {
    GabagoolConfig {
        max_pair_cost: optimize_max_pair_cost(c),
        min_improvement: optimize_min_improvement(c),
        order_size_usd: optimize_order_size(c),
        max_position_usd: optimize_max_position(c),
        first_buy_threshold: optimize_first_buy_threshold(c),
        refresh_interval_secs: optimize_refresh_interval(c),
    }
}

/// Wide spreads leave more margin; high volatility tightens the bound.
fn optimize_max_pair_cost(c: &MarketConditions) -> Decimal {
    let mut base = if c.avg_spread > dec!(0.15) {
        dec!(0.92)
    } else if c.avg_spread > dec!(0.10) {
        dec!(0.94)
    } else if c.avg_spread < dec!(0.06) {
        dec!(0.98)
    } else {
        dec!(0.95)
    };

    if c.volatility_score > 70.0 {
        base -= dec!(0.02);
    } else if c.volatility_score < 30.0 {
        base += dec!(0.01);
    }

    base.clamp(dec!(0.90), dec!(0.99))
}

/// No gate on a fresh book; the closer positions sit to $1, the more
/// flexible the gate, and vice versa.
fn optimize_min_improvement(c: &MarketConditions) -> Decimal {
    if c.active_positions == 0 {
        return Decimal::ZERO;
    }

    let value = if c.avg_pair_cost > dec!(0.98) {
        dec!(0.001)
    } else if c.avg_pair_cost > dec!(0.96) {
        dec!(0.002)
    } else if c.avg_pair_cost > dec!(0.94) {
        dec!(0.005)
    } else {
        dec!(0.008)
    };

    value.clamp(Decimal::ZERO, dec!(0.010))
}

/// Scale order size with liquidity; boost when positions are close to
/// locking.
fn optimize_order_size(c: &MarketConditions) -> Decimal {
    let mut base = if c.avg_liquidity > dec!(100000) {
        dec!(75)
    } else if c.avg_liquidity > dec!(50000) {
        dec!(50)
    } else if c.avg_liquidity > dec!(20000) {
        dec!(35)
    } else if c.avg_liquidity < dec!(10000) {
        dec!(15)
    } else {
        dec!(25)
    };

    if c.avg_pair_cost < dec!(0.96) && c.active_positions > 0 {
        base *= dec!(1.5);
    }

    base.clamp(dec!(10), dec!(100))
}

/// Larger caps in deep books; shrink when exposure is spread across many
/// active positions.
fn optimize_max_position(c: &MarketConditions) -> Decimal {
    let mut base = if c.avg_liquidity > dec!(100000) {
        dec!(1000)
    } else if c.avg_liquidity > dec!(50000) {
        dec!(750)
    } else if c.avg_liquidity < dec!(20000) {
        dec!(300)
    } else {
        dec!(500)
    };

    if c.active_positions > 5 {
        base *= dec!(0.7);
    }

    base.clamp(dec!(200), dec!(1000))
}

/// Aggressive entries when spreads are wide or volatility is high.
fn optimize_first_buy_threshold(c: &MarketConditions) -> Decimal {
    let mut base = if c.avg_spread > dec!(0.12) {
        dec!(0.50)
    } else if c.avg_spread < dec!(0.06) {
        dec!(0.60)
    } else {
        dec!(0.55)
    };

    if c.volatility_score > 70.0 {
        base -= dec!(0.05);
    } else if c.volatility_score < 30.0 {
        base += dec!(0.05);
    }

    base.clamp(dec!(0.45), dec!(0.65))
}

/// Slower polling while the WebSocket covers real-time updates; faster
/// under volatility or with positions at risk.
fn optimize_refresh_interval(c: &MarketConditions) -> f64 {
    let mut base: f64 = if c.ws_connected { 1.5 } else { 1.0 };

    if c.volatility_score > 70.0 {
        base = 0.5;
    } else if c.volatility_score > 50.0 {
        base = base.min(1.0);
    }

    if c.active_positions > 3 {
        base = base.min(0.5);
    }

    base.clamp(0.5, 2.0)
}

/// Relative change above the apply threshold. A transition from or to
/// zero always counts.
fn changed(old: f64, new: f64) -> bool {
    if old == 0.0 {
        return new != 0.0;
    }
    ((new - old) / old).abs() > APPLY_THRESHOLD
}

pub struct AutoOptimizer {
    cache: Arc<MarketCache>,
    gabagool: Arc<GabagoolEngine>,
    scanner: Arc<Scanner>,
    volatility: Arc<VolatilityFeed>,

    mode: RwLock<OptimizerMode>,
    enabled: AtomicBool,

    conditions: RwLock<Option<MarketConditions>>,
    suggested: RwLock<GabagoolConfig>,
    events: Mutex<VecDeque<OptimizationEvent>>,
    total_adjustments: AtomicU64,
    last_applied: RwLock<Option<DateTime<Utc>>>,

    run_loop: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl AutoOptimizer {
    pub fn new(
        cache: Arc<MarketCache>,
        gabagool: Arc<GabagoolEngine>,
        scanner: Arc<Scanner>,
        volatility: Arc<VolatilityFeed>,
        mode: OptimizerMode,
    ) -> Self {
        Self {
            cache,
            gabagool,
            scanner,
            volatility,
            mode: RwLock::new(mode),
            enabled: AtomicBool::new(true),
            conditions: RwLock::new(None),
            suggested: RwLock::new(GabagoolConfig::default()),
            events: Mutex::new(VecDeque::new()),
            total_adjustments: AtomicU64::new(0),
            last_applied: RwLock::new(None),
            run_loop: Mutex::new(None),
        }
    }

    pub async fn mode(&self) -> OptimizerMode {
        *self.mode.read().await
    }

    pub async fn set_mode(&self, mode: OptimizerMode) {
        let mut current = self.mode.write().await;
        if *current != mode {
            info!("Optimizer mode changed: {:?} -> {:?}", *current, mode);
            *current = mode;
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Start the periodic optimization loop.
    pub async fn start(optimizer: &Arc<AutoOptimizer>) {
        let mut guard = optimizer.run_loop.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let this = optimizer.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(UPDATE_INTERVAL) => {
                        if let Err(e) = this.tick().await {
                            warn!("Optimizer tick failed: {}", e);
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        *guard = Some((handle, tx));
        info!("Optimizer started in {:?} mode", optimizer.mode().await);
    }

    pub async fn stop(&self) {
        let mut guard = self.run_loop.lock().await;
        if let Some((handle, tx)) = guard.take() {
            let _ = tx.send(true);
            let _ = handle.await;
            info!("Optimizer stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.run_loop.lock().await.is_some()
    }

    /// One optimization pass: collect, compute, apply or suggest.
    pub async fn tick(&self) -> anyhow::Result<()> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mode = *self.mode.read().await;
        if mode == OptimizerMode::Manual {
            return Ok(());
        }

        let conditions = self.collect_conditions().await;
        let target = compute_target(&conditions);

        if mode == OptimizerMode::FullAuto {
            let changes = self.apply(&target, &conditions).await;
            if !changes.is_empty() {
                *self.last_applied.write().await = Some(Utc::now());
                info!("Optimizer applied {} parameter changes", changes.len());
            }
        }

        *self.suggested.write().await = target;
        *self.conditions.write().await = Some(conditions);
        Ok(())
    }

    /// Snapshot conditions from the cache, the strategy and the feeds.
    pub async fn collect_conditions(&self) -> MarketConditions {
        let mut conditions = MarketConditions::default();

        {
            let markets = self.cache.markets().await;

            let spreads: Vec<Decimal> = markets
                .values()
                .filter(|m| m.is_valid())
                .map(|m| m.effective_spread())
                .filter(|s| *s > Decimal::ZERO)
                .collect();
            if !spreads.is_empty() {
                conditions.avg_spread =
                    spreads.iter().sum::<Decimal>() / Decimal::from(spreads.len() as u32);
            }

            let volumes: Vec<Decimal> = markets
                .values()
                .map(|m| m.market.volume)
                .filter(|v| *v > Decimal::ZERO)
                .collect();
            if !volumes.is_empty() {
                conditions.avg_volume =
                    volumes.iter().sum::<Decimal>() / Decimal::from(volumes.len() as u32);
            }

            let liquidities: Vec<Decimal> = markets
                .values()
                .map(|m| m.market.liquidity)
                .filter(|l| *l > Decimal::ZERO)
                .collect();
            if !liquidities.is_empty() {
                conditions.avg_liquidity =
                    liquidities.iter().sum::<Decimal>() / Decimal::from(liquidities.len() as u32);
            }
        }

        let active = self.gabagool.active_positions().await;
        conditions.active_positions = active.len();
        conditions.locked_positions = self.gabagool.locked_positions().await.len();
        if !active.is_empty() {
            conditions.avg_pair_cost = active.iter().map(|p| p.pair_cost()).sum::<Decimal>()
                / Decimal::from(active.len() as u32);
        }

        conditions.ws_connected = self.scanner.ws_connected();
        conditions.volatility_score = self.volatility.score().await;
        conditions.timestamp = Utc::now();
        conditions
    }

    /// Apply fields whose relative change exceeds the threshold. Returns
    /// the names of the changed parameters.
    async fn apply(&self, target: &GabagoolConfig, conditions: &MarketConditions) -> Vec<String> {
        let current = self.gabagool.config().await;
        let mut next = current.clone();
        let mut changes = Vec::new();

        let fields: [(&str, f64, f64, &str); 6] = [
            (
                "max_pair_cost",
                decimal_f64(current.max_pair_cost),
                decimal_f64(target.max_pair_cost),
                "spread/volatility",
            ),
            (
                "min_improvement",
                decimal_f64(current.min_improvement),
                decimal_f64(target.min_improvement),
                "position_state",
            ),
            (
                "order_size_usd",
                decimal_f64(current.order_size_usd),
                decimal_f64(target.order_size_usd),
                "liquidity",
            ),
            (
                "max_position_usd",
                decimal_f64(current.max_position_usd),
                decimal_f64(target.max_position_usd),
                "liquidity/diversification",
            ),
            (
                "first_buy_threshold",
                decimal_f64(current.first_buy_threshold),
                decimal_f64(target.first_buy_threshold),
                "spread",
            ),
            (
                "refresh_interval_secs",
                current.refresh_interval_secs,
                target.refresh_interval_secs,
                "volatility/positions",
            ),
        ];

        let mut events = self.events.lock().await;
        for (name, old, new, reason) in fields {
            if changed(old, new) {
                changes.push(name.to_string());
                events.push_back(OptimizationEvent {
                    timestamp: conditions.timestamp,
                    param: name.to_string(),
                    old_value: old,
                    new_value: new,
                    reason: reason.to_string(),
                });
                while events.len() > MAX_EVENTS {
                    events.pop_front();
                }
                info!("Optimizer: {} {:.4} -> {:.4} ({})", name, old, new, reason);
            }
        }
        drop(events);

        if changes.is_empty() {
            return changes;
        }

        for name in &changes {
            match name.as_str() {
                "max_pair_cost" => next.max_pair_cost = target.max_pair_cost,
                "min_improvement" => next.min_improvement = target.min_improvement,
                "order_size_usd" => next.order_size_usd = target.order_size_usd,
                "max_position_usd" => next.max_position_usd = target.max_position_usd,
                "first_buy_threshold" => next.first_buy_threshold = target.first_buy_threshold,
                "refresh_interval_secs" => {
                    next.refresh_interval_secs = target.refresh_interval_secs
                }
                _ => {}
            }
        }

        self.total_adjustments
            .fetch_add(changes.len() as u64, Ordering::SeqCst);
        self.gabagool.set_config(next).await;
        changes
    }

    /// Pending suggestions in SEMI_AUTO mode: fields diverging from the
    /// current configuration by more than 1%.
    pub async fn suggestions(&self) -> Vec<Suggestion> {
        let current = self.gabagool.config().await;
        let suggested = self.suggested.read().await.clone();

        let pairs = [
            (
                "max_pair_cost",
                decimal_f64(current.max_pair_cost),
                decimal_f64(suggested.max_pair_cost),
            ),
            (
                "min_improvement",
                decimal_f64(current.min_improvement),
                decimal_f64(suggested.min_improvement),
            ),
            (
                "order_size_usd",
                decimal_f64(current.order_size_usd),
                decimal_f64(suggested.order_size_usd),
            ),
            (
                "max_position_usd",
                decimal_f64(current.max_position_usd),
                decimal_f64(suggested.max_position_usd),
            ),
            (
                "first_buy_threshold",
                decimal_f64(current.first_buy_threshold),
                decimal_f64(suggested.first_buy_threshold),
            ),
            (
                "refresh_interval_secs",
                current.refresh_interval_secs,
                suggested.refresh_interval_secs,
            ),
        ];

        pairs
            .into_iter()
            .filter(|(_, old, new)| changed(*old, *new))
            .map(|(name, old, new)| Suggestion {
                param: name.to_string(),
                current: old,
                suggested: new,
                change_pct: if old != 0.0 {
                    (new - old) / old * 100.0
                } else {
                    100.0
                },
            })
            .collect()
    }

    pub async fn status(&self) -> OptimizerStatus {
        OptimizerStatus {
            mode: *self.mode.read().await,
            enabled: self.enabled.load(Ordering::SeqCst),
            running: self.is_running().await,
            last_applied: *self.last_applied.read().await,
            total_adjustments: self.total_adjustments.load(Ordering::SeqCst),
            conditions: self.conditions.read().await.clone(),
            suggested: self.suggested.read().await.clone(),
            recent_events: {
                let events = self.events.lock().await;
                events.iter().rev().take(20).rev().cloned().collect()
            },
        }
    }
}

fn decimal_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions() -> MarketConditions {
        MarketConditions::default()
    }

    #[test]
    fn test_max_pair_cost_bands() {
        let mut c = conditions();
        c.avg_spread = dec!(0.16);
        c.volatility_score = 75.0;
        assert_eq!(optimize_max_pair_cost(&c), dec!(0.90));

        c.avg_spread = dec!(0.05);
        c.volatility_score = 20.0;
        assert_eq!(optimize_max_pair_cost(&c), dec!(0.99));

        c.avg_spread = dec!(0.08);
        c.volatility_score = 50.0;
        assert_eq!(optimize_max_pair_cost(&c), dec!(0.95));
    }

    #[test]
    fn test_min_improvement_tracks_position_state() {
        let mut c = conditions();
        c.active_positions = 0;
        assert_eq!(optimize_min_improvement(&c), Decimal::ZERO);

        c.active_positions = 2;
        c.avg_pair_cost = dec!(0.99);
        assert_eq!(optimize_min_improvement(&c), dec!(0.001));

        c.avg_pair_cost = dec!(0.95);
        assert_eq!(optimize_min_improvement(&c), dec!(0.005));

        c.avg_pair_cost = dec!(0.90);
        assert_eq!(optimize_min_improvement(&c), dec!(0.008));
    }

    #[test]
    fn test_order_size_bands_and_boost() {
        let mut c = conditions();
        c.avg_liquidity = dec!(60000);
        assert_eq!(optimize_order_size(&c), dec!(50));

        // Near-lock positions boost the size by 1.5x
        c.avg_pair_cost = dec!(0.95);
        c.active_positions = 1;
        assert_eq!(optimize_order_size(&c), dec!(75));

        // Boost clamps at the ceiling
        c.avg_liquidity = dec!(150000);
        assert_eq!(optimize_order_size(&c), dec!(100));

        c.avg_liquidity = dec!(5000);
        c.avg_pair_cost = Decimal::ONE;
        c.active_positions = 0;
        assert_eq!(optimize_order_size(&c), dec!(15));
    }

    #[test]
    fn test_max_position_shrinks_when_spread_thin() {
        let mut c = conditions();
        c.avg_liquidity = dec!(60000);
        c.active_positions = 6;
        assert_eq!(optimize_max_position(&c), dec!(525));

        c.active_positions = 2;
        assert_eq!(optimize_max_position(&c), dec!(750));

        c.avg_liquidity = dec!(10000);
        assert_eq!(optimize_max_position(&c), dec!(300));
    }

    #[test]
    fn test_first_buy_threshold_bands() {
        let mut c = conditions();
        c.avg_spread = dec!(0.16);
        c.volatility_score = 75.0;
        assert_eq!(optimize_first_buy_threshold(&c), dec!(0.45));

        c.avg_spread = dec!(0.05);
        c.volatility_score = 20.0;
        assert_eq!(optimize_first_buy_threshold(&c), dec!(0.65));
    }

    #[test]
    fn test_refresh_interval_rules() {
        let mut c = conditions();
        c.ws_connected = true;
        c.volatility_score = 40.0;
        assert_eq!(optimize_refresh_interval(&c), 1.5);

        c.volatility_score = 75.0;
        assert_eq!(optimize_refresh_interval(&c), 0.5);

        c.volatility_score = 40.0;
        c.active_positions = 4;
        assert_eq!(optimize_refresh_interval(&c), 0.5);
    }

    #[test]
    fn test_changed_threshold() {
        assert!(!changed(0.95, 0.95));
        assert!(!changed(0.95, 0.954)); // 0.4%
        assert!(changed(0.95, 0.97)); // 2.1%
        assert!(changed(0.0, 0.005));
        assert!(!changed(0.0, 0.0));
    }

    #[tokio::test]
    async fn test_full_auto_apply_is_idempotent() {
        use crate::scanner::{Scanner, ScannerConfig};
        use common::{
            Config, ExchangeGateway, GatewayError, Market, MarketQuery, OrderAck, OrderBook,
            OrderRequest,
        };

        struct NullGateway;

        #[async_trait::async_trait]
        impl ExchangeGateway for NullGateway {
            async fn list_markets(
                &self,
                _query: &MarketQuery,
            ) -> Result<Vec<Market>, GatewayError> {
                Ok(Vec::new())
            }
            async fn get_market(
                &self,
                _condition_id: &str,
            ) -> Result<Option<Market>, GatewayError> {
                Ok(None)
            }
            async fn get_orderbook(&self, _token_id: &str) -> Result<OrderBook, GatewayError> {
                Ok(OrderBook::default())
            }
            async fn place_limit_order(
                &self,
                _request: &OrderRequest,
            ) -> Result<OrderAck, GatewayError> {
                Ok(OrderAck {
                    id: "order-1".to_string(),
                    status: "live".to_string(),
                })
            }
            async fn cancel_order(&self, _order_id: &str) -> Result<(), GatewayError> {
                Ok(())
            }
            async fn cancel_all(&self) -> Result<(), GatewayError> {
                Ok(())
            }
        }

        let config = Config {
            api_url: "http://localhost".to_string(),
            ws_url: "ws://localhost".to_string(),
            volatility_api_url: "http://localhost".to_string(),
            scan_interval_secs: 1.0,
            markets_refresh_secs: 60,
            keywords: Vec::new(),
            data_dir: std::env::temp_dir(),
        };

        let gateway: Arc<dyn ExchangeGateway> = Arc::new(NullGateway);
        let cache = Arc::new(MarketCache::new());
        let gabagool = Arc::new(GabagoolEngine::new(
            gateway.clone(),
            GabagoolConfig::default(),
            true,
        ));
        let scanner = Arc::new(Scanner::new(
            gateway,
            cache.clone(),
            ScannerConfig::default(),
        ));
        let volatility = Arc::new(VolatilityFeed::new(&config));

        let optimizer = AutoOptimizer::new(
            cache,
            gabagool.clone(),
            scanner,
            volatility,
            OptimizerMode::FullAuto,
        );

        let conditions = MarketConditions {
            avg_spread: dec!(0.16),
            volatility_score: 75.0,
            avg_liquidity: dec!(60000),
            active_positions: 6,
            avg_pair_cost: dec!(0.99),
            ..MarketConditions::default()
        };
        let target = compute_target(&conditions);

        let first = optimizer.apply(&target, &conditions).await;
        assert!(!first.is_empty());
        assert_eq!(gabagool.config().await.max_pair_cost, dec!(0.90));
        let events_after_first = optimizer.events.lock().await.len();

        // Re-applying the same target changes nothing and logs nothing
        let second = optimizer.apply(&target, &conditions).await;
        assert!(second.is_empty());
        assert_eq!(optimizer.events.lock().await.len(), events_after_first);
    }

    #[test]
    fn test_compute_target_full_scenario() {
        // High-volatility wide-spread book with many active positions
        let c = MarketConditions {
            avg_spread: dec!(0.16),
            volatility_score: 75.0,
            avg_liquidity: dec!(60000),
            active_positions: 6,
            avg_pair_cost: dec!(0.99),
            ..MarketConditions::default()
        };

        let target = compute_target(&c);
        assert_eq!(target.max_pair_cost, dec!(0.90));
        assert_eq!(target.min_improvement, dec!(0.001));
        assert_eq!(target.order_size_usd, dec!(50));
        assert_eq!(target.max_position_usd, dec!(525));
        assert_eq!(target.first_buy_threshold, dec!(0.45));
        assert_eq!(target.refresh_interval_secs, 0.5);
    }
}
