//! Market scanner.
//!
//! Discovers markets by keyword, refreshes orderbook tops with bounded
//! parallelism (priority markets first), and merges real-time WebSocket
//! updates into the market cache. REST refresh and WS ingestion write
//! the same fields; last writer wins on the update timestamp.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use common::{ExchangeGateway, FeedClient, FeedMessage, FeedSocket, Market, MarketQuery};

use crate::cache::{MarketCache, UpdateSource};

/// Consecutive cycle failures before the long pause.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Pause after repeated failures.
const ERROR_PAUSE: Duration = Duration::from_secs(30);
/// Floor on the inter-cycle sleep.
const MIN_CYCLE_SLEEP: Duration = Duration::from_millis(500);
/// EMA smoothing factor for the cycle-duration metric.
const CYCLE_EMA_ALPHA: f64 = 0.1;
/// WS keepalive ping interval.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
/// How often the WS task checks for newly discovered tokens.
const WS_SUBSCRIBE_CHECK: Duration = Duration::from_secs(30);

/// Scanner lifecycle. Any state can transition to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerState {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Orderbook refresh cadence.
    pub scan_interval: Duration,
    /// Market discovery cadence.
    pub markets_refresh_interval: Duration,
    /// Keywords for discovery queries.
    pub keywords: Vec<String>,
    /// Bound on parallel orderbook fetches.
    pub max_concurrent_fetches: usize,
    /// WS connect/reconnect attempts before REST-only fallback.
    pub ws_reconnect_attempts: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            markets_refresh_interval: Duration::from_secs(60),
            keywords: vec![
                "BTC".to_string(),
                "ETH".to_string(),
                "SOL".to_string(),
                "XRP".to_string(),
            ],
            max_concurrent_fetches: 20,
            ws_reconnect_attempts: 3,
        }
    }
}

/// Scanner performance counters for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerStats {
    pub state: ScannerState,
    pub market_count: usize,
    pub cycles_completed: u64,
    pub consecutive_errors: u32,
    /// EMA of cycle duration, seconds.
    pub avg_cycle_secs: f64,
    pub ws_connected: bool,
    /// Set once the feed has permanently failed and refresh continues
    /// on REST alone.
    pub ws_rest_only: bool,
    pub last_discovery: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CycleMetrics {
    cycles_completed: u64,
    consecutive_errors: u32,
    avg_cycle_secs: Option<f64>,
}

impl CycleMetrics {
    fn record_success(&mut self, elapsed: Duration) {
        self.cycles_completed += 1;
        self.consecutive_errors = 0;
        let sample = elapsed.as_secs_f64();
        self.avg_cycle_secs = Some(match self.avg_cycle_secs {
            Some(avg) => CYCLE_EMA_ALPHA * sample + (1.0 - CYCLE_EMA_ALPHA) * avg,
            None => sample,
        });
    }
}

pub struct Scanner {
    gateway: Arc<dyn ExchangeGateway>,
    cache: Arc<MarketCache>,
    config: ScannerConfig,

    state: RwLock<ScannerState>,
    priority_ids: RwLock<HashSet<String>>,
    semaphore: Arc<Semaphore>,
    metrics: RwLock<CycleMetrics>,
    last_discovery: RwLock<Option<DateTime<Utc>>>,

    ws_connected: AtomicBool,
    ws_rest_only: AtomicBool,

    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        cache: Arc<MarketCache>,
        config: ScannerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_fetches));
        Self {
            gateway,
            cache,
            config,
            state: RwLock::new(ScannerState::Stopped),
            priority_ids: RwLock::new(HashSet::new()),
            semaphore,
            metrics: RwLock::new(CycleMetrics::default()),
            last_discovery: RwLock::new(None),
            ws_connected: AtomicBool::new(false),
            ws_rest_only: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> ScannerState {
        *self.state.read().await
    }

    pub fn ws_connected(&self) -> bool {
        self.ws_connected.load(Ordering::SeqCst)
    }

    /// Markets refreshed before the rest each cycle; tracks the
    /// strategy's active positions.
    pub async fn set_priority_markets(&self, ids: HashSet<String>) {
        *self.priority_ids.write().await = ids;
    }

    pub async fn stats(&self) -> ScannerStats {
        let metrics = self.metrics.read().await;
        ScannerStats {
            state: *self.state.read().await,
            market_count: self.cache.market_count().await,
            cycles_completed: metrics.cycles_completed,
            consecutive_errors: metrics.consecutive_errors,
            avg_cycle_secs: metrics.avg_cycle_secs.unwrap_or(0.0),
            ws_connected: self.ws_connected(),
            ws_rest_only: self.ws_rest_only.load(Ordering::SeqCst),
            last_discovery: *self.last_discovery.read().await,
        }
    }

    /// Start the scanner: initial discovery, then the refresh loop and
    /// (when a feed client is given) the WebSocket ingestion task.
    ///
    /// A failed initial discovery is fatal: the scanner enters `Error`
    /// and refuses to start.
    pub async fn start(scanner: &Arc<Scanner>, feed: Option<FeedClient>) -> anyhow::Result<()> {
        {
            let mut state = scanner.state.write().await;
            match *state {
                ScannerState::Running | ScannerState::Starting => return Ok(()),
                _ => *state = ScannerState::Starting,
            }
        }

        if let Err(e) = scanner.discover().await {
            *scanner.state.write().await = ScannerState::Error;
            return Err(anyhow!("initial market discovery failed: {e}"));
        }

        let mut tasks = scanner.tasks.lock().await;

        let this = scanner.clone();
        tasks.push(tokio::spawn(async move { this.scan_loop().await }));

        if let Some(feed) = feed {
            let this = scanner.clone();
            tasks.push(tokio::spawn(async move { this.ws_loop(feed).await }));
        }

        *scanner.state.write().await = ScannerState::Running;
        info!(
            "Scanner started: {} markets, interval {:?}",
            scanner.cache.market_count().await,
            scanner.config.scan_interval
        );
        Ok(())
    }

    /// Stop the scanner and await its tasks.
    pub async fn stop(&self) {
        *self.state.write().await = ScannerState::Stopped;
        let _ = self.shutdown.send(true);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.ws_connected.store(false, Ordering::SeqCst);
        info!("Scanner stopped");
    }

    /// Suspend orderbook refresh; WS ingestion stays active.
    pub async fn pause(&self) {
        let mut state = self.state.write().await;
        if *state == ScannerState::Running {
            *state = ScannerState::Paused;
            info!("Scanner paused");
        }
    }

    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        if *state == ScannerState::Paused {
            *state = ScannerState::Running;
            info!("Scanner resumed");
        }
    }

    /// Force an immediate discovery + refresh pass.
    pub async fn force_refresh(&self) -> anyhow::Result<()> {
        self.discover().await?;
        self.refresh_orderbooks().await
    }

    async fn scan_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            match *self.state.read().await {
                ScannerState::Stopped | ScannerState::Error => break,
                ScannerState::Paused => {
                    tokio::select! {
                        _ = sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
                _ => {}
            }

            let started = Instant::now();
            let result = self.run_cycle().await;
            let elapsed = started.elapsed();

            match result {
                Ok(()) => {
                    self.metrics.write().await.record_success(elapsed);
                }
                Err(e) => {
                    let errors = {
                        let mut metrics = self.metrics.write().await;
                        metrics.consecutive_errors += 1;
                        metrics.consecutive_errors
                    };
                    warn!("Scan cycle failed ({} consecutive): {}", errors, e);

                    let backoff = if errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(
                            "{} consecutive failures, pausing {:?}",
                            errors, ERROR_PAUSE
                        );
                        self.metrics.write().await.consecutive_errors = 0;
                        ERROR_PAUSE
                    } else {
                        Duration::from_secs(2 * errors as u64)
                    };
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
            }

            // Never overlap cycles; sleep at least the floor
            let wait = self
                .config
                .scan_interval
                .checked_sub(elapsed)
                .unwrap_or(Duration::ZERO)
                .max(MIN_CYCLE_SLEEP);
            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let due = {
            let last = self.last_discovery.read().await;
            match *last {
                Some(at) => Utc::now() - at
                    >= chrono::Duration::from_std(self.config.markets_refresh_interval)
                        .unwrap_or(chrono::Duration::seconds(60)),
                None => true,
            }
        };
        if due {
            self.discover().await?;
        }

        self.refresh_orderbooks().await
    }

    /// Query the exchange for matching markets, fetch details for new
    /// ones in parallel, and drop markets that expired or went inactive.
    async fn discover(&self) -> anyhow::Result<()> {
        let query = MarketQuery::keywords(&self.config.keywords);
        let discovered = self.gateway.list_markets(&query).await?;
        debug!("Discovery returned {} markets", discovered.len());

        let mut new_conditions: Vec<Market> = Vec::new();
        for market in discovered {
            if self.cache.contains_condition(&market.condition_id).await {
                self.cache.refresh_metadata(&market).await;
            } else {
                new_conditions.push(market);
            }
        }

        // Fetch authoritative details for new markets in parallel
        let mut join_set = JoinSet::new();
        for market in new_conditions {
            let gateway = self.gateway.clone();
            let permit = self.semaphore.clone().acquire_owned().await?;
            join_set.spawn(async move {
                let _permit = permit;
                gateway.get_market(&market.condition_id).await
            });
        }

        let mut added = 0usize;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(Some(details))) if details.is_active => {
                    if self.cache.insert_market(details).await {
                        added += 1;
                    }
                }
                Ok(Ok(_)) => {} // absent or inactive
                Ok(Err(e)) => debug!("Market detail fetch failed: {}", e),
                Err(e) => debug!("Market detail task failed: {}", e),
            }
        }

        // Drop markets the exchange no longer serves
        let now = Utc::now();
        let stale: Vec<String> = {
            let markets = self.cache.markets().await;
            markets
                .values()
                .filter(|m| !m.market.is_active || m.market.is_expired(now))
                .map(|m| m.market.id.clone())
                .collect()
        };
        for market_id in stale {
            self.cache.remove_market(&market_id).await;
        }

        if added > 0 {
            info!("Discovered {} new markets", added);
        }
        *self.last_discovery.write().await = Some(Utc::now());
        Ok(())
    }

    /// Refresh orderbook tops for all markets, priority ids first. Both
    /// sides of a market are fetched concurrently inside its task;
    /// markets run in parallel under the semaphore.
    async fn refresh_orderbooks(&self) -> anyhow::Result<()> {
        let priority = self.priority_ids.read().await.clone();

        let mut ordered: Vec<(String, String)> = Vec::new();
        {
            let markets = self.cache.markets().await;
            let mut rest = Vec::new();
            for data in markets.values() {
                let tokens = (
                    data.market.token_yes_id.clone(),
                    data.market.token_no_id.clone(),
                );
                if priority.contains(&data.market.id) {
                    ordered.push(tokens);
                } else {
                    rest.push(tokens);
                }
            }
            ordered.extend(rest);
        }

        if ordered.is_empty() {
            return Ok(());
        }
        let total = ordered.len();

        let mut join_set = JoinSet::new();
        for (token_yes, token_no) in ordered {
            let gateway = self.gateway.clone();
            let cache = self.cache.clone();
            let permit = self.semaphore.clone().acquire_owned().await?;
            join_set.spawn(async move {
                let _permit = permit;
                let (yes, no) = tokio::join!(
                    Self::fetch_book(&gateway, &cache, &token_yes),
                    Self::fetch_book(&gateway, &cache, &token_no)
                );
                u32::from(yes.is_err()) + u32::from(no.is_err())
            });
        }

        let mut failed_fetches = 0u32;
        while let Some(result) = join_set.join_next().await {
            failed_fetches += result.unwrap_or(2);
        }

        // Partial failures are tolerated; a fully failed pass is a cycle error
        if failed_fetches as usize >= total * 2 {
            return Err(anyhow!("all {} orderbook fetches failed", total));
        }
        Ok(())
    }

    /// Fetch one token's book (through the TTL cache) and merge its top
    /// into the market cache.
    async fn fetch_book(
        gateway: &Arc<dyn ExchangeGateway>,
        cache: &Arc<MarketCache>,
        token_id: &str,
    ) -> anyhow::Result<()> {
        let book = match cache.cached_book(token_id).await {
            Some(book) => book,
            None => {
                let book = gateway.get_orderbook(token_id).await?;
                cache.store_book(token_id, book.clone()).await;
                book
            }
        };

        cache
            .apply_book_update(token_id, book.best_bid(), book.best_ask(), UpdateSource::Rest)
            .await;
        Ok(())
    }

    /// Long-lived WebSocket ingestion. On repeated connection failure the
    /// scanner keeps running on REST refresh alone, without further logs.
    async fn ws_loop(self: Arc<Self>, feed: FeedClient) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut ws = match feed.connect_with_retry(self.config.ws_reconnect_attempts).await {
                Ok(ws) => ws,
                Err(_) => {
                    self.ws_rest_only.store(true, Ordering::SeqCst);
                    self.ws_connected.store(false, Ordering::SeqCst);
                    info!("Market feed unavailable; continuing in REST-only mode");
                    return;
                }
            };
            self.ws_connected.store(true, Ordering::SeqCst);

            let mut subscribed: HashSet<String> = HashSet::new();
            if self.subscribe_delta(&feed, &mut ws, &mut subscribed).await.is_err() {
                self.ws_connected.store(false, Ordering::SeqCst);
                continue;
            }

            let mut last_ping = Instant::now();
            let mut last_subscribe_check = Instant::now();

            let mut stopping = false;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        stopping = true;
                    }
                    result = timeout(Duration::from_secs(5), feed.read_message(&mut ws)) => match result {
                        Ok(Ok(Some(message))) => self.handle_feed_message(message).await,
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => {
                            debug!("Market feed read failed: {}", e);
                            break;
                        }
                        Err(_) => {} // read timeout; fall through to keepalive
                    }
                }

                if stopping {
                    let _ = ws.close(None).await;
                    self.ws_connected.store(false, Ordering::SeqCst);
                    return;
                }

                if last_ping.elapsed() >= WS_PING_INTERVAL {
                    if feed.send_ping(&mut ws).await.is_err() {
                        break;
                    }
                    last_ping = Instant::now();
                }

                if last_subscribe_check.elapsed() >= WS_SUBSCRIBE_CHECK {
                    if self
                        .subscribe_delta(&feed, &mut ws, &mut subscribed)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    last_subscribe_check = Instant::now();
                }
            }

            self.ws_connected.store(false, Ordering::SeqCst);
            debug!("Market feed disconnected, reconnecting");
        }
    }

    /// Subscribe to tokens not yet covered by this connection.
    async fn subscribe_delta(
        &self,
        feed: &FeedClient,
        ws: &mut FeedSocket,
        subscribed: &mut HashSet<String>,
    ) -> Result<(), common::FeedError> {
        let tokens = self.cache.token_ids().await;
        let new_tokens: Vec<String> = tokens
            .into_iter()
            .filter(|t| !subscribed.contains(t))
            .collect();
        if new_tokens.is_empty() {
            return Ok(());
        }

        feed.subscribe(ws, new_tokens.clone()).await?;
        subscribed.extend(new_tokens);
        Ok(())
    }

    async fn handle_feed_message(&self, message: FeedMessage) {
        match message {
            FeedMessage::PriceUpdate(update) => {
                if let Some(price) = update.price_decimal() {
                    self.cache.apply_price_update(&update.token_id, price).await;
                }
            }
            FeedMessage::Book(book) => {
                self.cache
                    .apply_book_update(
                        &book.token_id,
                        book.best_bid(),
                        book.best_ask(),
                        UpdateSource::WsBook,
                    )
                    .await;
            }
            FeedMessage::Books(books) => {
                for book in books {
                    self.cache
                        .apply_book_update(
                            &book.token_id,
                            book.best_bid(),
                            book.best_ask(),
                            UpdateSource::WsBook,
                        )
                        .await;
                }
            }
            FeedMessage::Error(message) => warn!("Market feed error: {}", message),
            FeedMessage::Trade(_) | FeedMessage::Heartbeat => {}
            FeedMessage::Unknown(text) => debug!("Unknown feed message: {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{GatewayError, OrderAck, OrderBook, OrderRequest, PriceLevel};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    /// Scripted gateway serving a fixed market list and orderbooks.
    struct ScriptedGateway {
        markets: Vec<Market>,
        books: HashMap<String, OrderBook>,
        book_fetches: AtomicU32,
        fail_books: AtomicBool,
    }

    impl ScriptedGateway {
        fn new(markets: Vec<Market>) -> Self {
            let mut books = HashMap::new();
            for market in &markets {
                books.insert(
                    market.token_yes_id.clone(),
                    book(dec!(0.44), dec!(0.48)),
                );
                books.insert(market.token_no_id.clone(), book(dec!(0.50), dec!(0.55)));
            }
            Self {
                markets,
                books,
                book_fetches: AtomicU32::new(0),
                fail_books: AtomicBool::new(false),
            }
        }
    }

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook {
            bids: vec![PriceLevel {
                price: bid,
                size: dec!(100),
            }],
            asks: vec![PriceLevel {
                price: ask,
                size: dec!(100),
            }],
        }
    }

    use rust_decimal::Decimal;

    #[async_trait::async_trait]
    impl ExchangeGateway for ScriptedGateway {
        async fn list_markets(&self, _query: &MarketQuery) -> Result<Vec<Market>, GatewayError> {
            Ok(self.markets.clone())
        }

        async fn get_market(&self, condition_id: &str) -> Result<Option<Market>, GatewayError> {
            Ok(self
                .markets
                .iter()
                .find(|m| m.condition_id == condition_id)
                .cloned())
        }

        async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook, GatewayError> {
            self.book_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_books.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("down".to_string()));
            }
            self.books
                .get(token_id)
                .cloned()
                .ok_or_else(|| GatewayError::Status4xx {
                    status: 404,
                    message: "no book".to_string(),
                })
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

    fn market(id: &str) -> Market {
        Market {
            id: id.to_string(),
            condition_id: format!("cond-{id}"),
            question: format!("Will BTC market {id} go up?"),
            token_yes_id: format!("{id}-yes"),
            token_no_id: format!("{id}-no"),
            price_yes: dec!(0.5),
            price_no: dec!(0.5),
            volume: dec!(30000),
            liquidity: dec!(12000),
            end_date: None,
            is_active: true,
        }
    }

    fn scanner_with(gateway: Arc<ScriptedGateway>) -> (Arc<Scanner>, Arc<MarketCache>) {
        let cache = Arc::new(MarketCache::new());
        let scanner = Arc::new(Scanner::new(
            gateway,
            cache.clone(),
            ScannerConfig::default(),
        ));
        (scanner, cache)
    }

    #[tokio::test]
    async fn test_discovery_inserts_new_markets() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1"), market("m2")]));
        let (scanner, cache) = scanner_with(gateway);

        scanner.discover().await.unwrap();
        assert_eq!(cache.market_count().await, 2);

        // Re-discovery deduplicates against known condition ids
        scanner.discover().await.unwrap();
        assert_eq!(cache.market_count().await, 2);
    }

    #[tokio::test]
    async fn test_discovery_drops_expired_markets() {
        let mut expiring = market("m1");
        expiring.end_date = Some(Utc::now() + chrono::Duration::seconds(1));
        let gateway = Arc::new(ScriptedGateway::new(vec![expiring]));
        let (scanner, cache) = scanner_with(gateway);

        scanner.discover().await.unwrap();
        assert_eq!(cache.market_count().await, 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        scanner.discover().await.unwrap();
        assert_eq!(cache.market_count().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_updates_both_sides() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1")]));
        let (scanner, cache) = scanner_with(gateway);

        scanner.discover().await.unwrap();
        scanner.refresh_orderbooks().await.unwrap();

        let data = cache.get("m1").await.unwrap();
        assert_eq!(data.best_bid_yes, Some(dec!(0.44)));
        assert_eq!(data.best_ask_yes, Some(dec!(0.48)));
        assert_eq!(data.spread_yes, Some(dec!(0.04)));
        assert_eq!(data.best_bid_no, Some(dec!(0.50)));
        assert_eq!(data.spread_no, Some(dec!(0.05)));
        assert!(data.is_valid());
    }

    #[tokio::test]
    async fn test_book_ttl_cache_absorbs_consecutive_refreshes() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1")]));
        let (scanner, _cache) = scanner_with(gateway.clone());

        scanner.discover().await.unwrap();
        scanner.refresh_orderbooks().await.unwrap();
        let first_pass = gateway.book_fetches.load(Ordering::SeqCst);
        assert_eq!(first_pass, 2);

        // Within the 500 ms TTL: served from cache, no new fetches
        scanner.refresh_orderbooks().await.unwrap();
        assert_eq!(gateway.book_fetches.load(Ordering::SeqCst), first_pass);
    }

    #[tokio::test]
    async fn test_fully_failed_refresh_is_cycle_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1")]));
        let (scanner, _cache) = scanner_with(gateway.clone());
        scanner.discover().await.unwrap();

        gateway.fail_books.store(true, Ordering::SeqCst);
        assert!(scanner.refresh_orderbooks().await.is_err());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1")]));
        let (scanner, _cache) = scanner_with(gateway);

        assert_eq!(scanner.state().await, ScannerState::Stopped);

        Scanner::start(&scanner, None).await.unwrap();
        assert_eq!(scanner.state().await, ScannerState::Running);

        scanner.pause().await;
        assert_eq!(scanner.state().await, ScannerState::Paused);

        scanner.resume().await;
        assert_eq!(scanner.state().await, ScannerState::Running);

        scanner.stop().await;
        assert_eq!(scanner.state().await, ScannerState::Stopped);
    }

    #[tokio::test]
    async fn test_pause_resume_preserves_metrics() {
        let gateway = Arc::new(ScriptedGateway::new(vec![market("m1")]));
        let (scanner, _cache) = scanner_with(gateway);
        Scanner::start(&scanner, None).await.unwrap();

        // Let at least one cycle complete
        tokio::time::sleep(Duration::from_millis(200)).await;
        let before = scanner.stats().await;

        scanner.pause().await;
        scanner.resume().await;

        let after = scanner.stats().await;
        assert!(after.cycles_completed >= before.cycles_completed);
        assert_eq!(after.state, ScannerState::Running);

        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_priority_markets_refreshed_first() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            market("m1"),
            market("m2"),
            market("m3"),
        ]));
        let cache = Arc::new(MarketCache::new());
        // Serialize fetches so publish order matches scheduling order
        let scanner = Arc::new(Scanner::new(
            gateway,
            cache.clone(),
            ScannerConfig {
                max_concurrent_fetches: 1,
                ..ScannerConfig::default()
            },
        ));
        scanner.discover().await.unwrap();

        scanner
            .set_priority_markets(HashSet::from(["m3".to_string()]))
            .await;

        let mut rx = cache.subscribe();
        scanner.refresh_orderbooks().await.unwrap();

        // The first published update belongs to the priority market
        let first = rx.recv().await.unwrap();
        assert_eq!(first.data.market.id, "m3");
    }

    #[test]
    fn test_cycle_ema() {
        let mut metrics = CycleMetrics::default();
        metrics.record_success(Duration::from_secs(1));
        assert_eq!(metrics.avg_cycle_secs, Some(1.0));

        metrics.record_success(Duration::from_secs(2));
        // 0.1 * 2 + 0.9 * 1
        assert!((metrics.avg_cycle_secs.unwrap() - 1.1).abs() < 1e-9);
        assert_eq!(metrics.cycles_completed, 2);
    }
}
