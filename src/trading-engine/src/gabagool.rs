//! Gabagool strategy - binary pair arbitrage.
//!
//! Accumulates YES and NO shares on the same market so that
//! `avg(YES) + avg(NO) < $1.00`. Since exactly one side pays $1 at
//! settlement, `min(qty_yes, qty_no)` is a guaranteed payout; once it
//! exceeds total cost the profit is locked.
//!
//! Derived position values (averages, pair cost, locked flag) are cached
//! and recomputed on every mutation, never in the read paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use common::{ExchangeGateway, Market, OrderRequest, Side};

use crate::cache::MarketData;

/// Relative price move below which a market is not re-evaluated.
const PRICE_MOVE_THRESHOLD: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // 0.005

/// Lifecycle of an event-driven strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Stopped,
    Running,
    Paused,
}

/// Strategy configuration, retuned at runtime by the auto-optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GabagoolConfig {
    /// Upper bound on the post-trade pair cost.
    pub max_pair_cost: Decimal,
    /// Minimum pair-cost reduction required once both sides are held.
    pub min_improvement: Decimal,
    /// Dollar size of each accumulation order.
    pub order_size_usd: Decimal,
    /// Maximum invested per market.
    pub max_position_usd: Decimal,
    /// Price ceiling for the first buy on a side.
    pub first_buy_threshold: Decimal,
    /// Suggested scanner refresh interval, seconds.
    pub refresh_interval_secs: f64,
}

impl Default for GabagoolConfig {
    fn default() -> Self {
        Self {
            max_pair_cost: dec!(0.98),
            min_improvement: dec!(0.005),
            order_size_usd: dec!(25),
            max_position_usd: dec!(500),
            first_buy_threshold: dec!(0.60),
            refresh_interval_secs: 1.0,
        }
    }
}

/// Accumulated YES/NO position on one binary market.
///
/// Raw quantities and costs are only written through [`PairPosition::add`],
/// which recomputes the cached derived values before returning.
#[derive(Debug, Clone, Serialize)]
pub struct PairPosition {
    pub market_id: String,
    pub token_yes_id: String,
    pub token_no_id: String,
    pub question: String,

    qty_yes: Decimal,
    qty_no: Decimal,
    cost_yes: Decimal,
    cost_no: Decimal,

    pub trades_yes: u32,
    pub trades_no: u32,

    pub created_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,

    // Cached derived values, recomputed on every mutation
    avg_yes: Decimal,
    avg_no: Decimal,
    pair_cost: Decimal,
    locked: bool,
}

impl PairPosition {
    pub fn new(market: &Market) -> Self {
        let mut position = Self {
            market_id: market.id.clone(),
            token_yes_id: market.token_yes_id.clone(),
            token_no_id: market.token_no_id.clone(),
            question: market.question.clone(),
            qty_yes: Decimal::ZERO,
            qty_no: Decimal::ZERO,
            cost_yes: Decimal::ZERO,
            cost_no: Decimal::ZERO,
            trades_yes: 0,
            trades_no: 0,
            created_at: Utc::now(),
            last_trade_at: None,
            avg_yes: Decimal::ZERO,
            avg_no: Decimal::ZERO,
            pair_cost: Decimal::ONE,
            locked: false,
        };
        position.recompute();
        position
    }

    fn recompute(&mut self) {
        self.avg_yes = if self.qty_yes > Decimal::ZERO {
            self.cost_yes / self.qty_yes
        } else {
            Decimal::ZERO
        };
        self.avg_no = if self.qty_no > Decimal::ZERO {
            self.cost_no / self.qty_no
        } else {
            Decimal::ZERO
        };
        self.pair_cost = if self.qty_yes > Decimal::ZERO && self.qty_no > Decimal::ZERO {
            self.avg_yes + self.avg_no
        } else {
            Decimal::ONE
        };
        self.locked = self.locked_profit() > Decimal::ZERO;
    }

    pub fn qty(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.qty_yes,
            Side::No => self.qty_no,
        }
    }

    pub fn qty_yes(&self) -> Decimal {
        self.qty_yes
    }

    pub fn qty_no(&self) -> Decimal {
        self.qty_no
    }

    pub fn cost_yes(&self) -> Decimal {
        self.cost_yes
    }

    pub fn cost_no(&self) -> Decimal {
        self.cost_no
    }

    /// Average price paid per YES share (cached).
    pub fn avg_yes(&self) -> Decimal {
        self.avg_yes
    }

    /// Average price paid per NO share (cached).
    pub fn avg_no(&self) -> Decimal {
        self.avg_no
    }

    /// Combined average cost of the pair; 1.0 while one side is empty (cached).
    pub fn pair_cost(&self) -> Decimal {
        self.pair_cost
    }

    pub fn total_cost(&self) -> Decimal {
        self.cost_yes + self.cost_no
    }

    /// Settlement pays $1 per share on exactly one side.
    pub fn guaranteed_payout(&self) -> Decimal {
        self.qty_yes.min(self.qty_no)
    }

    /// Guaranteed payout minus total invested; positive means locked.
    pub fn locked_profit(&self) -> Decimal {
        self.guaranteed_payout() - self.total_cost()
    }

    /// True once the settlement payout exceeds the investment (cached).
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Quantities within 20% of each other.
    pub fn is_balanced(&self) -> bool {
        if self.qty_yes.is_zero() || self.qty_no.is_zero() {
            return false;
        }
        let ratio = self.qty_yes / self.qty_no;
        ratio >= dec!(0.8) && ratio <= dec!(1.2)
    }

    pub fn trade_count(&self) -> u32 {
        self.trades_yes + self.trades_no
    }

    /// Pair cost after a hypothetical buy; 1.0 while the opposite side
    /// would still be empty.
    pub fn simulate_buy(&self, side: Side, price: Decimal, qty: Decimal) -> Decimal {
        match side {
            Side::Yes => {
                let new_avg = (self.cost_yes + price * qty) / (self.qty_yes + qty);
                if self.qty_no.is_zero() {
                    Decimal::ONE
                } else {
                    new_avg + self.avg_no
                }
            }
            Side::No => {
                let new_avg = (self.cost_no + price * qty) / (self.qty_no + qty);
                if self.qty_yes.is_zero() {
                    Decimal::ONE
                } else {
                    self.avg_yes + new_avg
                }
            }
        }
    }

    /// Record a fill and refresh the derived cache.
    pub fn add(&mut self, side: Side, price: Decimal, qty: Decimal) {
        match side {
            Side::Yes => {
                self.qty_yes += qty;
                self.cost_yes += price * qty;
                self.trades_yes += 1;
            }
            Side::No => {
                self.qty_no += qty;
                self.cost_no += price * qty;
                self.trades_no += 1;
            }
        }
        self.last_trade_at = Some(Utc::now());
        self.recompute();
    }
}

/// Buy decision produced by [`GabagoolEngine::analyze_opportunity`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyDecision {
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

/// Outcome of a bilateral (both-leg) order placement.
#[derive(Debug, Clone, Serialize)]
pub struct PairOrderOutcome {
    pub yes_order_id: Option<String>,
    pub no_order_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregate strategy statistics for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct GabagoolStats {
    pub status: StrategyStatus,
    pub uptime_seconds: i64,
    pub total_trades: u64,
    pub total_invested: Decimal,
    pub positions_count: usize,
    pub active_count: usize,
    pub locked_count: usize,
    pub total_locked_profit: Decimal,
    pub config: GabagoolConfig,
}

#[derive(Default)]
struct EngineState {
    positions: HashMap<String, PairPosition>,
    active_ids: HashSet<String>,
    locked_ids: HashSet<String>,
    last_prices: HashMap<String, (Decimal, Decimal)>,
    total_trades: u64,
    total_invested: Decimal,
    started_at: Option<DateTime<Utc>>,
}

impl EngineState {
    /// Keep the active/locked partition consistent with the position.
    fn update_partition(&mut self, market_id: &str) {
        let Some(position) = self.positions.get(market_id) else {
            return;
        };
        if position.is_locked() {
            self.locked_ids.insert(market_id.to_string());
            self.active_ids.remove(market_id);
        } else {
            self.active_ids.insert(market_id.to_string());
            self.locked_ids.remove(market_id);
        }
    }
}

/// Decision rule for one side, shared by both the analyzer path and the
/// pre-execution re-check.
fn should_buy(
    position: Option<&PairPosition>,
    config: &GabagoolConfig,
    side: Side,
    price: Decimal,
    qty: Decimal,
) -> bool {
    if price <= Decimal::ZERO || qty <= Decimal::ZERO {
        return false;
    }

    let Some(position) = position else {
        // Fresh market: only the bootstrap threshold and the position cap apply
        return price < config.first_buy_threshold && price * qty <= config.max_position_usd;
    };

    if position.total_cost() + price * qty > config.max_position_usd {
        return false;
    }

    // First buy on this side bootstraps without a pair-cost reference
    if position.qty(side).is_zero() {
        return price < config.first_buy_threshold;
    }

    let new_pair_cost = position.simulate_buy(side, price, qty);
    if new_pair_cost >= config.max_pair_cost {
        return false;
    }

    // With the opposite side held, the buy must improve the pair cost
    if !position.qty(side.opposite()).is_zero() {
        let improvement = position.pair_cost() - new_pair_cost;
        if improvement < config.min_improvement {
            return false;
        }
    }

    true
}

/// The pair-arbitrage engine. Event driven: no internal loop.
pub struct GabagoolEngine {
    gateway: Arc<dyn ExchangeGateway>,
    config: RwLock<GabagoolConfig>,
    status: RwLock<StrategyStatus>,
    state: RwLock<EngineState>,
    /// Serializes order placement per market; distinct markets proceed in
    /// parallel.
    order_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    dry_run: bool,
}

impl GabagoolEngine {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: GabagoolConfig, dry_run: bool) -> Self {
        Self {
            gateway,
            config: RwLock::new(config),
            status: RwLock::new(StrategyStatus::Stopped),
            state: RwLock::new(EngineState::default()),
            order_locks: Mutex::new(HashMap::new()),
            dry_run,
        }
    }

    pub async fn status(&self) -> StrategyStatus {
        *self.status.read().await
    }

    pub async fn config(&self) -> GabagoolConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: GabagoolConfig) {
        *self.config.write().await = config;
    }

    pub async fn start(&self) {
        let mut status = self.status.write().await;
        if *status == StrategyStatus::Running {
            return;
        }
        *status = StrategyStatus::Running;
        let mut state = self.state.write().await;
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        info!("Gabagool engine started");
    }

    pub async fn stop(&self) {
        *self.status.write().await = StrategyStatus::Stopped;
        info!("Gabagool engine stopped");
    }

    pub async fn pause(&self) {
        let mut status = self.status.write().await;
        if *status == StrategyStatus::Running {
            *status = StrategyStatus::Paused;
            info!("Gabagool engine paused");
        }
    }

    pub async fn resume(&self) {
        let mut status = self.status.write().await;
        if *status == StrategyStatus::Paused {
            *status = StrategyStatus::Running;
            info!("Gabagool engine resumed");
        }
    }

    pub async fn get_position(&self, market_id: &str) -> Option<PairPosition> {
        self.state.read().await.positions.get(market_id).cloned()
    }

    pub async fn positions(&self) -> Vec<PairPosition> {
        self.state.read().await.positions.values().cloned().collect()
    }

    pub async fn active_positions(&self) -> Vec<PairPosition> {
        let state = self.state.read().await;
        state
            .active_ids
            .iter()
            .filter_map(|id| state.positions.get(id).cloned())
            .collect()
    }

    pub async fn locked_positions(&self) -> Vec<PairPosition> {
        let state = self.state.read().await;
        state
            .locked_ids
            .iter()
            .filter_map(|id| state.positions.get(id).cloned())
            .collect()
    }

    /// Market ids the scanner should refresh first each cycle.
    pub async fn active_position_ids(&self) -> HashSet<String> {
        self.state.read().await.active_ids.clone()
    }

    /// Evaluate both sides of a market at the given ask prices.
    ///
    /// Returns the leg to buy, or `None` when neither side qualifies.
    /// Markets whose prices moved less than 0.5% since the last
    /// evaluation are skipped outright.
    pub async fn analyze_opportunity(
        &self,
        market_id: &str,
        price_yes: Decimal,
        price_no: Decimal,
    ) -> Option<BuyDecision> {
        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;

        if state.locked_ids.contains(market_id) {
            return None;
        }

        if let Some((old_yes, old_no)) = state.last_prices.get(market_id) {
            if !price_moved(*old_yes, price_yes) && !price_moved(*old_no, price_no) {
                return None;
            }
        }
        state
            .last_prices
            .insert(market_id.to_string(), (price_yes, price_no));

        let qty_yes = order_qty(config.order_size_usd, price_yes);
        let qty_no = order_qty(config.order_size_usd, price_no);

        let position = state.positions.get(market_id);
        let can_yes = should_buy(position, &config, Side::Yes, price_yes, qty_yes);
        let can_no = should_buy(position, &config, Side::No, price_no, qty_no);

        match (can_yes, can_no) {
            // Both eligible: take the cheaper leg
            (true, true) if price_yes <= price_no => Some(BuyDecision {
                side: Side::Yes,
                price: price_yes,
                qty: qty_yes,
            }),
            (true, true) => Some(BuyDecision {
                side: Side::No,
                price: price_no,
                qty: qty_no,
            }),
            (true, false) => Some(BuyDecision {
                side: Side::Yes,
                price: price_yes,
                qty: qty_yes,
            }),
            (false, true) => Some(BuyDecision {
                side: Side::No,
                price: price_no,
                qty: qty_no,
            }),
            (false, false) => None,
        }
    }

    /// Buy one leg: place the order, then update the position, cache and
    /// partition atomically with respect to other engine calls.
    pub async fn buy(&self, market: &Market, decision: BuyDecision) -> bool {
        let lock = self.order_lock(&market.id).await;
        let _guard = lock.lock().await;

        // Re-check under the placement lock: another task may have
        // mutated the position while we waited.
        {
            let config = self.config.read().await;
            let state = self.state.read().await;
            if state.locked_ids.contains(&market.id) {
                return false;
            }
            if !should_buy(
                state.positions.get(&market.id),
                &config,
                decision.side,
                decision.price,
                decision.qty,
            ) {
                return false;
            }
        }

        if !self.dry_run {
            let request = OrderRequest::buy(
                market.token_id(decision.side),
                decision.price,
                decision.qty,
            );
            if let Err(e) = self.gateway.place_limit_order(&request).await {
                warn!(
                    "Order failed: BUY {} {} @ {} on {}: {}",
                    decision.side, decision.qty, decision.price, market.question, e
                );
                return false;
            }
        }

        let mut state = self.state.write().await;
        let position = state
            .positions
            .entry(market.id.clone())
            .or_insert_with(|| PairPosition::new(market));
        position.add(decision.side, decision.price, decision.qty);
        let pair_cost = position.pair_cost();
        let locked = position.is_locked();
        let locked_profit = position.locked_profit();

        state.total_trades += 1;
        state.total_invested += decision.price * decision.qty;
        let was_locked = state.locked_ids.contains(&market.id);
        state.update_partition(&market.id);

        info!(
            "BUY {}: {:.2} @ ${:.3} | pair cost {:.4} | {}",
            decision.side, decision.qty, decision.price, pair_cost, market.question
        );

        if locked && !was_locked {
            info!(
                "Locked profit ${:.2} on {}",
                locked_profit, market.question
            );
        }

        true
    }

    /// Evaluate a market update and execute the resulting decision.
    /// This is the scanner-driven entry point.
    pub async fn on_market_update(&self, data: &MarketData) -> Option<Side> {
        if *self.status.read().await != StrategyStatus::Running {
            return None;
        }

        // Accumulation buys cross the spread, so both asks must be quoted
        let price_yes = data.best_ask_yes?;
        let price_no = data.best_ask_no?;

        let decision = self
            .analyze_opportunity(&data.market.id, price_yes, price_no)
            .await?;

        if self.buy(&data.market, decision).await {
            Some(decision.side)
        } else {
            None
        }
    }

    /// Place both legs of a pair concurrently.
    ///
    /// On a one-leg failure the successful leg is cancelled and the
    /// partial result is reported with whatever ids exist.
    pub async fn buy_pair(
        &self,
        market: &Market,
        price_yes: Decimal,
        qty_yes: Decimal,
        price_no: Decimal,
        qty_no: Decimal,
    ) -> PairOrderOutcome {
        let lock = self.order_lock(&market.id).await;
        let _guard = lock.lock().await;

        let yes_request = OrderRequest::buy(&market.token_yes_id, price_yes, qty_yes);
        let no_request = OrderRequest::buy(&market.token_no_id, price_no, qty_no);

        let (yes_result, no_result) = tokio::join!(
            self.gateway.place_limit_order(&yes_request),
            self.gateway.place_limit_order(&no_request)
        );

        match (yes_result, no_result) {
            (Ok(yes_ack), Ok(no_ack)) => {
                let mut state = self.state.write().await;
                let position = state
                    .positions
                    .entry(market.id.clone())
                    .or_insert_with(|| PairPosition::new(market));
                position.add(Side::Yes, price_yes, qty_yes);
                position.add(Side::No, price_no, qty_no);
                state.total_trades += 2;
                state.total_invested += price_yes * qty_yes + price_no * qty_no;
                state.update_partition(&market.id);

                PairOrderOutcome {
                    yes_order_id: Some(yes_ack.id),
                    no_order_id: Some(no_ack.id),
                    error: None,
                }
            }
            (Ok(yes_ack), Err(e)) => {
                warn!("NO leg failed ({}), cancelling YES order {}", e, yes_ack.id);
                if let Err(cancel_err) = self.gateway.cancel_order(&yes_ack.id).await {
                    warn!("Failed to cancel YES leg {}: {}", yes_ack.id, cancel_err);
                }
                PairOrderOutcome {
                    yes_order_id: Some(yes_ack.id),
                    no_order_id: None,
                    error: Some(format!("NO leg failed: {e}")),
                }
            }
            (Err(e), Ok(no_ack)) => {
                warn!("YES leg failed ({}), cancelling NO order {}", e, no_ack.id);
                if let Err(cancel_err) = self.gateway.cancel_order(&no_ack.id).await {
                    warn!("Failed to cancel NO leg {}: {}", no_ack.id, cancel_err);
                }
                PairOrderOutcome {
                    yes_order_id: None,
                    no_order_id: Some(no_ack.id),
                    error: Some(format!("YES leg failed: {e}")),
                }
            }
            (Err(yes_err), Err(no_err)) => PairOrderOutcome {
                yes_order_id: None,
                no_order_id: None,
                error: Some(format!("both legs failed: YES: {yes_err}; NO: {no_err}")),
            },
        }
    }

    pub async fn stats(&self) -> GabagoolStats {
        let status = *self.status.read().await;
        let config = self.config.read().await.clone();
        let state = self.state.read().await;

        let total_locked_profit: Decimal = state
            .locked_ids
            .iter()
            .filter_map(|id| state.positions.get(id))
            .map(|p| p.locked_profit())
            .sum();

        let uptime_seconds = state
            .started_at
            .map(|t| (Utc::now() - t).num_seconds())
            .unwrap_or(0);

        GabagoolStats {
            status,
            uptime_seconds,
            total_trades: state.total_trades,
            total_invested: state.total_invested,
            positions_count: state.positions.len(),
            active_count: state.active_ids.len(),
            locked_count: state.locked_ids.len(),
            total_locked_profit,
            config,
        }
    }

    async fn order_lock(&self, market_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks
            .entry(market_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Order quantity for a dollar size at a price, truncated to the
/// exchange's two-decimal share precision.
fn order_qty(order_size_usd: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (order_size_usd / price).round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Relative move of at least 0.5%.
fn price_moved(old: Decimal, new: Decimal) -> bool {
    if old <= Decimal::ZERO {
        return true;
    }
    ((new - old) / old).abs() >= PRICE_MOVE_THRESHOLD
}
