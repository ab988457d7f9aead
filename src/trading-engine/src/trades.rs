//! Trade manager - stop-loss / take-profit / trailing / timeout exits.
//!
//! Tracks open positions and closes them when an exit condition fires.
//! Two paths drive exits concurrently: the WebSocket price hook for
//! sub-50ms reaction, and a 1 s polling monitor as a backstop for
//! markets that stopped emitting events. A compare-and-set on the
//! `Active` status under the write lock prevents the two paths from
//! closing the same trade twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{clip_price, ExchangeGateway, OrderRequest, Side};

/// Default stop-loss distance when auto SL/TP is enabled: -15% of entry.
const DEFAULT_STOP_LOSS_PCT: Decimal = Decimal::from_parts(15, 0, 0, false, 2);
/// Default take-profit distance when auto SL/TP is enabled: +20% of entry.
const DEFAULT_TAKE_PROFIT_PCT: Decimal = Decimal::from_parts(20, 0, 0, false, 2);
/// Polling monitor interval.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Trade lifecycle. Transitions out of `Active` are one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Active,
    Closed,
    StoppedOut,
    TakeProfit,
    TrailingStop,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        *self != TradeStatus::Active
    }
}

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Timeout,
}

impl CloseReason {
    /// Terminal status recorded for this close reason.
    fn terminal_status(&self) -> TradeStatus {
        match self {
            CloseReason::StopLoss => TradeStatus::StoppedOut,
            CloseReason::TakeProfit => TradeStatus::TakeProfit,
            CloseReason::TrailingStop => TradeStatus::TrailingStop,
            CloseReason::Manual | CloseReason::Timeout => TradeStatus::Closed,
        }
    }
}

/// An open or historical trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub market_id: String,
    pub market_question: String,
    /// Token held by this trade; sold back on close.
    pub token_id: String,
    pub side: Side,

    pub entry_price: Decimal,
    pub size: Decimal,
    pub current_price: Decimal,
    /// Highest price observed since entry, for the trailing stop.
    pub highest_price: Decimal,

    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    /// 0 = no timeout.
    pub max_duration_seconds: u64,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<Decimal>,
}

impl Trade {
    pub fn unrealized_pnl(&self) -> Decimal {
        if self.status != TradeStatus::Active {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) * self.size
    }

    pub fn realized_pnl(&self) -> Decimal {
        match (self.status.is_terminal(), self.exit_price) {
            (true, Some(exit)) if self.status != TradeStatus::Cancelled => {
                (exit - self.entry_price) * self.size
            }
            _ => Decimal::ZERO,
        }
    }

    pub fn pnl_percent(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let reference = if self.status == TradeStatus::Active {
            self.current_price
        } else {
            match self.exit_price {
                Some(exit) => exit,
                None => return Decimal::ZERO,
            }
        };
        (reference - self.entry_price) / self.entry_price * dec!(100)
    }

    pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.closed_at.unwrap_or(now);
        (end - self.opened_at).num_seconds()
    }

    /// Current trailing stop level: `highest * (1 - pct)`.
    pub fn trailing_stop_price(&self) -> Option<Decimal> {
        let pct = self.trailing_stop_pct?;
        if self.highest_price <= Decimal::ZERO {
            return None;
        }
        Some(self.highest_price * (Decimal::ONE - pct))
    }

    /// Evaluate exit conditions in precedence order:
    /// stop-loss, take-profit, trailing stop, timeout.
    pub fn check_exit_conditions(&self, now: DateTime<Utc>) -> Option<CloseReason> {
        if self.status != TradeStatus::Active {
            return None;
        }
        if let Some(stop) = self.stop_loss {
            if self.current_price <= stop {
                return Some(CloseReason::StopLoss);
            }
        }
        if let Some(target) = self.take_profit {
            if self.current_price >= target {
                return Some(CloseReason::TakeProfit);
            }
        }
        if let Some(trailing) = self.trailing_stop_price() {
            if self.current_price <= trailing {
                return Some(CloseReason::TrailingStop);
            }
        }
        if self.max_duration_seconds > 0
            && self.duration_seconds(now) >= self.max_duration_seconds as i64
        {
            return Some(CloseReason::Timeout);
        }
        None
    }

    /// Copy with numeric fields rounded for the persisted record.
    fn rounded(&self) -> Trade {
        let round4 = |d: Decimal| d.round_dp(4);
        Trade {
            entry_price: round4(self.entry_price),
            size: self.size.round_dp(2),
            current_price: round4(self.current_price),
            highest_price: round4(self.highest_price),
            stop_loss: self.stop_loss.map(round4),
            take_profit: self.take_profit.map(round4),
            trailing_stop_pct: self.trailing_stop_pct.map(round4),
            exit_price: self.exit_price.map(round4),
            ..self.clone()
        }
    }
}

/// Request to open a trade.
#[derive(Debug, Clone)]
pub struct OpenTradeParams {
    pub market_id: String,
    pub market_question: String,
    pub token_id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub max_duration_seconds: u64,
}

/// Persisted trades file: `{counter, trades}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TradesFile {
    counter: u64,
    trades: Vec<Trade>,
}

/// Aggregate trade statistics for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct TradeStats {
    pub active_count: usize,
    pub closed_count: usize,
    pub total_trades: usize,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub win_rate_pct: Decimal,
    pub stopped_out_count: usize,
    pub take_profit_count: usize,
    pub monitoring: bool,
}

struct TradesState {
    trades: HashMap<Uuid, Trade>,
    /// market_id -> active trade ids, for O(1) event routing.
    by_market: HashMap<String, Vec<Uuid>>,
    counter: u64,
}

impl TradesState {
    fn index(&mut self, trade: &Trade) {
        self.by_market
            .entry(trade.market_id.clone())
            .or_default()
            .push(trade.id);
    }

    fn unindex(&mut self, trade: &Trade) {
        if let Some(ids) = self.by_market.get_mut(&trade.market_id) {
            ids.retain(|id| *id != trade.id);
            if ids.is_empty() {
                self.by_market.remove(&trade.market_id);
            }
        }
    }

    fn snapshot(&self) -> TradesFile {
        TradesFile {
            counter: self.counter,
            trades: self.trades.values().map(|t| t.rounded()).collect(),
        }
    }
}

/// Trade manager with automatic SL/TP monitoring.
pub struct TradeManager {
    gateway: Arc<dyn ExchangeGateway>,
    state: RwLock<TradesState>,
    data_file: PathBuf,
    auto_sl_tp: bool,

    // Persistence is fire-and-forget but ordered: snapshots carry a
    // sequence taken inside the mutation critical section, and the
    // writer discards snapshots older than the last one written.
    persist_seq: AtomicU64,
    written_seq: Arc<Mutex<u64>>,

    monitor: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl TradeManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, data_file: PathBuf, auto_sl_tp: bool) -> Self {
        let mut state = TradesState {
            trades: HashMap::new(),
            by_market: HashMap::new(),
            counter: 0,
        };

        match Self::load_file(&data_file) {
            Ok(Some(file)) => {
                state.counter = file.counter;
                for trade in file.trades {
                    if trade.status == TradeStatus::Active {
                        state
                            .by_market
                            .entry(trade.market_id.clone())
                            .or_default()
                            .push(trade.id);
                    }
                    state.trades.insert(trade.id, trade);
                }
                info!(
                    "Restored {} trades from {}",
                    state.trades.len(),
                    data_file.display()
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load trades file: {}", e),
        }

        Self {
            gateway,
            state: RwLock::new(state),
            data_file,
            auto_sl_tp,
            persist_seq: AtomicU64::new(0),
            written_seq: Arc::new(Mutex::new(0)),
            monitor: Mutex::new(None),
        }
    }

    fn load_file(path: &PathBuf) -> Result<Option<TradesFile>, anyhow::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Open a trade and place its entry order.
    ///
    /// Entry and derived levels are clipped to the exchange's [0.01, 0.99]
    /// price range. When `auto_sl_tp` is set and the caller omits levels,
    /// stop-loss defaults to -15% and take-profit to +20% of entry.
    pub async fn open_trade(&self, params: OpenTradeParams) -> Trade {
        let entry_price = clip_price(params.entry_price);

        let mut stop_loss = params.stop_loss;
        let mut take_profit = params.take_profit;
        if self.auto_sl_tp {
            stop_loss =
                stop_loss.or(Some(entry_price * (Decimal::ONE - DEFAULT_STOP_LOSS_PCT)));
            take_profit =
                take_profit.or(Some(entry_price * (Decimal::ONE + DEFAULT_TAKE_PROFIT_PCT)));
        }
        let stop_loss = stop_loss.map(clip_price);
        let take_profit = take_profit.map(clip_price);

        let trade = Trade {
            id: Uuid::new_v4(),
            market_id: params.market_id,
            market_question: params.market_question,
            token_id: params.token_id.clone(),
            side: params.side,
            entry_price,
            size: params.size,
            current_price: entry_price,
            highest_price: entry_price,
            stop_loss,
            take_profit,
            trailing_stop_pct: params.trailing_stop_pct,
            max_duration_seconds: params.max_duration_seconds,
            opened_at: Utc::now(),
            closed_at: None,
            status: TradeStatus::Active,
            close_reason: None,
            exit_price: None,
        };

        let request = OrderRequest::buy(&params.token_id, entry_price, params.size);
        if let Err(e) = self.gateway.place_limit_order(&request).await {
            warn!("Entry order failed for {}: {}", trade.market_question, e);
        }

        let snapshot = {
            let mut state = self.state.write().await;
            state.counter += 1;
            state.index(&trade);
            state.trades.insert(trade.id, trade.clone());
            self.sequenced_snapshot(&state)
        };
        self.spawn_persist(snapshot);

        info!(
            "Trade opened: {} {} @ ${} | SL {:?} | TP {:?}",
            trade.side, trade.size, trade.entry_price, trade.stop_loss, trade.take_profit
        );
        trade
    }

    /// Close a trade: one-shot transition out of `Active`, then post the
    /// opposite-side limit order at the exit price.
    ///
    /// Returns `None` when the trade does not exist or is already closed,
    /// which makes concurrent close attempts race-safe.
    pub async fn close_trade(
        &self,
        trade_id: Uuid,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Option<Trade> {
        let exit_price = clip_price(exit_price);

        let (closed, snapshot) = {
            let mut state = self.state.write().await;
            let trade = state.trades.get_mut(&trade_id)?;
            // CAS: only an active trade may transition
            if trade.status != TradeStatus::Active {
                return None;
            }

            trade.status = reason.terminal_status();
            trade.close_reason = Some(reason);
            trade.exit_price = Some(exit_price);
            trade.closed_at = Some(Utc::now());
            let closed = trade.clone();
            state.unindex(&closed);
            (closed, self.sequenced_snapshot(&state))
        };

        let request = OrderRequest::sell(&closed.token_id, exit_price, closed.size);
        if let Err(e) = self.gateway.place_limit_order(&request).await {
            warn!("Exit order failed for {}: {}", closed.market_question, e);
        }

        self.spawn_persist(snapshot);

        let pnl = closed.realized_pnl();
        info!(
            "Trade closed ({:?}): {} @ ${} | P&L ${:.2} ({:+.1}%)",
            reason,
            closed.side,
            exit_price,
            pnl,
            closed.pnl_percent()
        );
        Some(closed)
    }

    /// WebSocket-driven exit path. Updates every trade indexed under the
    /// market and closes those whose exit conditions fire.
    pub async fn on_price_update(&self, market_id: &str, price: Decimal) -> Vec<Trade> {
        let now = Utc::now();

        // Collect transitions under one write lock so the poll monitor
        // cannot close the same trades concurrently.
        let (fired, snapshot) = {
            let mut state = self.state.write().await;
            let Some(trade_ids) = state.by_market.get(market_id).cloned() else {
                return Vec::new();
            };

            let mut fired = Vec::new();
            for trade_id in trade_ids {
                let Some(trade) = state.trades.get_mut(&trade_id) else {
                    continue;
                };
                if trade.status != TradeStatus::Active {
                    continue;
                }

                trade.current_price = price;
                if price > trade.highest_price {
                    trade.highest_price = price;
                }

                if let Some(reason) = trade.check_exit_conditions(now) {
                    trade.status = reason.terminal_status();
                    trade.close_reason = Some(reason);
                    trade.exit_price = Some(price);
                    trade.closed_at = Some(now);
                    fired.push(trade.clone());
                }
            }

            for trade in &fired {
                state.unindex(trade);
            }

            if fired.is_empty() {
                return Vec::new();
            }
            (fired, self.sequenced_snapshot(&state))
        };

        for trade in &fired {
            let request = OrderRequest::sell(&trade.token_id, trade.exit_price.unwrap_or(price), trade.size);
            if let Err(e) = self.gateway.place_limit_order(&request).await {
                warn!("Exit order failed for {}: {}", trade.market_question, e);
            }
            info!(
                "Trade closed ({:?}) on price event: {} @ ${} | P&L ${:.2}",
                trade.close_reason.unwrap_or(CloseReason::Manual),
                trade.side,
                price,
                trade.realized_pnl()
            );
        }

        self.spawn_persist(snapshot);
        fired
    }

    /// Start the 1 s polling monitor, the backstop for trades whose
    /// markets no longer emit price events.
    pub async fn start_monitor(manager: &Arc<TradeManager>) {
        let mut guard = manager.monitor.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let this = manager.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(MONITOR_INTERVAL) => {
                        this.poll_exits().await;
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        *guard = Some((handle, tx));
        info!("Trade monitor started");
    }

    pub async fn stop_monitor(&self) {
        let mut guard = self.monitor.lock().await;
        if let Some((handle, tx)) = guard.take() {
            let _ = tx.send(true);
            let _ = handle.await;
            info!("Trade monitor stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    /// One polling pass over all active trades.
    async fn poll_exits(&self) {
        let now = Utc::now();
        let due: Vec<(Uuid, Decimal, CloseReason)> = {
            let state = self.state.read().await;
            state
                .trades
                .values()
                .filter(|t| t.status == TradeStatus::Active)
                .filter_map(|t| {
                    t.check_exit_conditions(now)
                        .map(|reason| (t.id, t.current_price, reason))
                })
                .collect()
        };

        for (trade_id, price, reason) in due {
            // close_trade re-checks Active, so a concurrent event-path
            // close simply makes this a no-op
            if self.close_trade(trade_id, price, reason).await.is_some() {
                debug!("Monitor closed trade {} ({:?})", trade_id, reason);
            }
        }
    }

    pub async fn get_trade(&self, trade_id: Uuid) -> Option<Trade> {
        self.state.read().await.trades.get(&trade_id).cloned()
    }

    pub async fn active_trades(&self) -> Vec<Trade> {
        self.state
            .read()
            .await
            .trades
            .values()
            .filter(|t| t.status == TradeStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn all_trades(&self) -> Vec<Trade> {
        self.state.read().await.trades.values().cloned().collect()
    }

    /// Adjust the stop-loss of an active trade.
    pub async fn set_stop_loss(&self, trade_id: Uuid, stop_loss: Decimal) -> bool {
        self.modify_active(trade_id, |t| t.stop_loss = Some(clip_price(stop_loss)))
            .await
    }

    /// Adjust the take-profit of an active trade.
    pub async fn set_take_profit(&self, trade_id: Uuid, take_profit: Decimal) -> bool {
        self.modify_active(trade_id, |t| t.take_profit = Some(clip_price(take_profit)))
            .await
    }

    /// Enable or adjust the trailing stop of an active trade.
    pub async fn set_trailing_stop(&self, trade_id: Uuid, pct: Decimal) -> bool {
        let pct = pct.clamp(dec!(0.01), dec!(0.50));
        self.modify_active(trade_id, |t| t.trailing_stop_pct = Some(pct))
            .await
    }

    pub async fn remove_stop_loss(&self, trade_id: Uuid) -> bool {
        self.modify_active(trade_id, |t| t.stop_loss = None).await
    }

    pub async fn remove_take_profit(&self, trade_id: Uuid) -> bool {
        self.modify_active(trade_id, |t| t.take_profit = None).await
    }

    async fn modify_active(&self, trade_id: Uuid, mutate: impl FnOnce(&mut Trade)) -> bool {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(trade) = state.trades.get_mut(&trade_id) else {
                return false;
            };
            if trade.status != TradeStatus::Active {
                return false;
            }
            mutate(trade);
            self.sequenced_snapshot(&state)
        };
        self.spawn_persist(snapshot);
        true
    }

    pub async fn stats(&self) -> TradeStats {
        let state = self.state.read().await;
        let monitoring = self.monitor.lock().await.is_some();

        let mut active_count = 0;
        let mut closed_count = 0;
        let mut unrealized = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut wins = 0usize;
        let mut stopped_out = 0usize;
        let mut took_profit = 0usize;

        for trade in state.trades.values() {
            if trade.status == TradeStatus::Active {
                active_count += 1;
                unrealized += trade.unrealized_pnl();
            } else {
                closed_count += 1;
                let pnl = trade.realized_pnl();
                realized += pnl;
                if pnl > Decimal::ZERO {
                    wins += 1;
                }
                match trade.close_reason {
                    Some(CloseReason::StopLoss) => stopped_out += 1,
                    Some(CloseReason::TakeProfit) => took_profit += 1,
                    _ => {}
                }
            }
        }

        let win_rate_pct = if closed_count > 0 {
            Decimal::from(wins as u32) / Decimal::from(closed_count as u32) * dec!(100)
        } else {
            Decimal::ZERO
        };

        TradeStats {
            active_count,
            closed_count,
            total_trades: state.trades.len(),
            unrealized_pnl: unrealized,
            realized_pnl: realized,
            win_rate_pct: win_rate_pct.round_dp(1),
            stopped_out_count: stopped_out,
            take_profit_count: took_profit,
            monitoring,
        }
    }

    /// Snapshot with a sequence taken inside the caller's critical section.
    fn sequenced_snapshot(&self, state: &TradesState) -> (u64, TradesFile) {
        let seq = self.persist_seq.fetch_add(1, Ordering::SeqCst) + 1;
        (seq, state.snapshot())
    }

    /// Persist off the hot path. Failures are logged, never propagated.
    fn spawn_persist(&self, (seq, snapshot): (u64, TradesFile)) {
        let file = self.data_file.clone();
        let written = self.written_seq.clone();

        tokio::spawn(async move {
            let mut last = written.lock().await;
            if *last > seq {
                // A newer snapshot is already on disk
                return;
            }
            *last = seq;

            let result = tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
                if let Some(parent) = file.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let contents = serde_json::to_string_pretty(&snapshot)?;
                std::fs::write(&file, contents)?;
                Ok(())
            })
            .await;

            match result {
                Ok(Err(e)) => warn!("Failed to persist trades: {}", e),
                Err(e) => warn!("Trade persistence task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        });
    }

    /// Write the current state synchronously, for shutdown. Holding the
    /// writer lock makes any still-pending background persist a no-op.
    pub async fn flush(&self) {
        let (seq, snapshot) = {
            let state = self.state.read().await;
            self.sequenced_snapshot(&state)
        };

        let mut last = self.written_seq.lock().await;
        if *last > seq {
            return;
        }
        *last = seq;

        let file = self.data_file.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file, serde_json::to_string_pretty(&snapshot)?)?;
            Ok(())
        })
        .await;
        if let Ok(Err(e)) = result {
            warn!("Failed to flush trades: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{GatewayError, Market, MarketQuery, OrderAck, OrderBook, OrderSide};
    use std::sync::atomic::AtomicU32;

    struct RecordingGateway {
        orders: Mutex<Vec<OrderRequest>>,
        placed: AtomicU32,
    }

    impl RecordingGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                orders: Mutex::new(Vec::new()),
                placed: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ExchangeGateway for RecordingGateway {
        async fn list_markets(&self, _query: &MarketQuery) -> Result<Vec<Market>, GatewayError> {
            Ok(Vec::new())
        }

        async fn get_market(&self, _condition_id: &str) -> Result<Option<Market>, GatewayError> {
            Ok(None)
        }

        async fn get_orderbook(&self, _token_id: &str) -> Result<OrderBook, GatewayError> {
            Ok(OrderBook::default())
        }

        async fn place_limit_order(
            &self,
            request: &OrderRequest,
        ) -> Result<OrderAck, GatewayError> {
            self.orders.lock().await.push(request.clone());
            let n = self.placed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OrderAck {
                id: format!("order-{n}"),
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

    fn manager_with(gateway: Arc<RecordingGateway>, auto_sl_tp: bool) -> (TradeManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = TradeManager::new(gateway, dir.path().join("trades.json"), auto_sl_tp);
        (manager, dir)
    }

    fn open_params(entry: Decimal, size: Decimal) -> OpenTradeParams {
        OpenTradeParams {
            market_id: "m1".to_string(),
            market_question: "Will BTC go up?".to_string(),
            token_id: "m1-yes".to_string(),
            side: Side::Yes,
            entry_price: entry,
            size,
            stop_loss: None,
            take_profit: None,
            trailing_stop_pct: None,
            max_duration_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_stop_loss_fires_on_price_event() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway.clone(), false);

        let trade = manager
            .open_trade(OpenTradeParams {
                stop_loss: Some(dec!(0.40)),
                ..open_params(dec!(0.50), dec!(100))
            })
            .await;
        assert_eq!(trade.status, TradeStatus::Active);

        let closed = manager.on_price_update("m1", dec!(0.395)).await;
        assert_eq!(closed.len(), 1);

        let closed = &closed[0];
        assert_eq!(closed.status, TradeStatus::StoppedOut);
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(closed.exit_price, Some(dec!(0.395)));
        assert_eq!(closed.realized_pnl(), dec!(-10.5));

        // Entry buy + exit sell
        let orders = gateway.orders.lock().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].side, OrderSide::Sell);
        assert_eq!(orders[1].price, dec!(0.395));
    }

    #[tokio::test]
    async fn test_trailing_stop_follows_peak() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let trade = manager
            .open_trade(OpenTradeParams {
                trailing_stop_pct: Some(dec!(0.10)),
                ..open_params(dec!(0.30), dec!(50))
            })
            .await;

        for price in [dec!(0.30), dec!(0.40), dec!(0.50), dec!(0.47)] {
            assert!(manager.on_price_update("m1", price).await.is_empty());
        }

        let current = manager.get_trade(trade.id).await.unwrap();
        assert_eq!(current.highest_price, dec!(0.50));
        assert_eq!(current.trailing_stop_price(), Some(dec!(0.45)));

        let closed = manager.on_price_update("m1", dec!(0.44)).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::TrailingStop);
        assert_eq!(closed[0].exit_price, Some(dec!(0.44)));
    }

    #[tokio::test]
    async fn test_exit_precedence_stop_loss_first() {
        // Both SL and trailing would fire; stop-loss takes precedence
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        manager
            .open_trade(OpenTradeParams {
                stop_loss: Some(dec!(0.45)),
                trailing_stop_pct: Some(dec!(0.05)),
                ..open_params(dec!(0.50), dec!(10))
            })
            .await;

        let closed = manager.on_price_update("m1", dec!(0.40)).await;
        assert_eq!(closed[0].close_reason, Some(CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn test_auto_sl_tp_defaults_and_clipping() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, true);

        let trade = manager.open_trade(open_params(dec!(0.50), dec!(10))).await;
        assert_eq!(trade.stop_loss, Some(dec!(0.425)));
        assert_eq!(trade.take_profit, Some(dec!(0.60)));

        // High entry: take-profit clips to 0.99
        let trade = manager.open_trade(open_params(dec!(0.90), dec!(10))).await;
        assert_eq!(trade.take_profit, Some(dec!(0.99)));
    }

    #[tokio::test]
    async fn test_close_is_single_shot() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let trade = manager.open_trade(open_params(dec!(0.50), dec!(10))).await;

        let first = manager
            .close_trade(trade.id, dec!(0.55), CloseReason::Manual)
            .await;
        assert!(first.is_some());

        // Second close attempt is rejected by the CAS on Active
        let second = manager
            .close_trade(trade.id, dec!(0.60), CloseReason::Manual)
            .await;
        assert!(second.is_none());

        let stored = manager.get_trade(trade.id).await.unwrap();
        assert_eq!(stored.exit_price, Some(dec!(0.55)));
    }

    #[tokio::test]
    async fn test_event_path_ignores_closed_trades() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let trade = manager
            .open_trade(OpenTradeParams {
                stop_loss: Some(dec!(0.40)),
                ..open_params(dec!(0.50), dec!(10))
            })
            .await;
        manager
            .close_trade(trade.id, dec!(0.50), CloseReason::Manual)
            .await;

        // Price event after manual close finds no indexed trade
        assert!(manager.on_price_update("m1", dec!(0.30)).await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_via_poll() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let trade = manager
            .open_trade(OpenTradeParams {
                max_duration_seconds: 1,
                ..open_params(dec!(0.50), dec!(10))
            })
            .await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        manager.poll_exits().await;

        let stored = manager.get_trade(trade.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::Closed);
        assert_eq!(stored.close_reason, Some(CloseReason::Timeout));
    }

    #[tokio::test]
    async fn test_persist_and_reload_roundtrip() {
        let gateway = RecordingGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");

        let manager = TradeManager::new(gateway.clone(), path.clone(), false);
        let trade = manager
            .open_trade(OpenTradeParams {
                stop_loss: Some(dec!(0.40)),
                ..open_params(dec!(0.50), dec!(100))
            })
            .await;
        manager.on_price_update("m1", dec!(0.395)).await;
        manager.flush().await;

        let reloaded = TradeManager::new(gateway, path, false);
        let stored = reloaded.get_trade(trade.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::StoppedOut);
        assert_eq!(stored.exit_price, Some(dec!(0.395)));
        assert_eq!(stored.entry_price, dec!(0.50));

        // Closed trades are not indexed for price events
        assert!(reloaded.on_price_update("m1", dec!(0.10)).await.is_empty());
    }

    #[tokio::test]
    async fn test_level_mutators_only_touch_active_trades() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let trade = manager.open_trade(open_params(dec!(0.50), dec!(10))).await;
        assert!(manager.set_stop_loss(trade.id, dec!(0.42)).await);
        assert!(manager.set_trailing_stop(trade.id, dec!(0.80)).await);

        let stored = manager.get_trade(trade.id).await.unwrap();
        assert_eq!(stored.stop_loss, Some(dec!(0.42)));
        // Trailing percentage clamps to 0.50
        assert_eq!(stored.trailing_stop_pct, Some(dec!(0.50)));

        manager
            .close_trade(trade.id, dec!(0.55), CloseReason::Manual)
            .await;
        assert!(!manager.set_stop_loss(trade.id, dec!(0.30)).await);
        assert!(!manager.remove_stop_loss(trade.id).await);
    }

    #[tokio::test]
    async fn test_stats_aggregate() {
        let gateway = RecordingGateway::new();
        let (manager, _dir) = manager_with(gateway, false);

        let winner = manager.open_trade(open_params(dec!(0.50), dec!(10))).await;
        let loser = manager
            .open_trade(OpenTradeParams {
                stop_loss: Some(dec!(0.40)),
                ..open_params(dec!(0.50), dec!(10))
            })
            .await;
        manager.open_trade(open_params(dec!(0.30), dec!(10))).await;

        manager
            .close_trade(winner.id, dec!(0.60), CloseReason::TakeProfit)
            .await;
        manager
            .close_trade(loser.id, dec!(0.40), CloseReason::StopLoss)
            .await;

        let stats = manager.stats().await;
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.closed_count, 2);
        assert_eq!(stats.win_rate_pct, dec!(50.0));
        assert_eq!(stats.stopped_out_count, 1);
        assert_eq!(stats.take_profit_count, 1);
        assert_eq!(stats.realized_pnl, dec!(0));
    }
}
