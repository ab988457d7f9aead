//! In-memory market cache.
//!
//! Holds the latest known state for every tracked market, a reverse
//! token index for O(1) routing of feed events, and a short-TTL
//! orderbook cache that absorbs redundant REST fetches at 1 Hz scans.
//! Derived spreads are recomputed inside the write-lock critical section,
//! so subscribers never observe a partially updated record.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

use common::{Market, OrderBook, Side};

/// How long a fetched orderbook top stays servable from cache.
const BOOK_CACHE_TTL: Duration = Duration::from_millis(500);

/// Capacity of the update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 512;

/// Full per-market state: the market plus latest top-of-book and spreads.
#[derive(Debug, Clone, Serialize)]
pub struct MarketData {
    pub market: Market,
    pub best_bid_yes: Option<Decimal>,
    pub best_ask_yes: Option<Decimal>,
    pub best_bid_no: Option<Decimal>,
    pub best_ask_no: Option<Decimal>,
    pub spread_yes: Option<Decimal>,
    pub spread_no: Option<Decimal>,
    pub last_update: DateTime<Utc>,
}

impl MarketData {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            best_bid_yes: None,
            best_ask_yes: None,
            best_bid_no: None,
            best_ask_no: None,
            spread_yes: None,
            spread_no: None,
            last_update: Utc::now(),
        }
    }

    /// A market is analyzable once the YES book is fully quoted.
    pub fn is_valid(&self) -> bool {
        self.best_bid_yes.is_some() && self.best_ask_yes.is_some() && self.spread_yes.is_some()
    }

    /// Arithmetic mean of the spreads that are present.
    pub fn effective_spread(&self) -> Decimal {
        let spreads: Vec<Decimal> = [self.spread_yes, self.spread_no]
            .into_iter()
            .flatten()
            .collect();
        if spreads.is_empty() {
            return Decimal::ZERO;
        }
        spreads.iter().sum::<Decimal>() / Decimal::from(spreads.len() as u32)
    }

    /// Apply a top-of-book update for one side and recompute its spread.
    fn apply_book(&mut self, side: Side, best_bid: Option<Decimal>, best_ask: Option<Decimal>) {
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };
        match side {
            Side::Yes => {
                self.best_bid_yes = best_bid;
                self.best_ask_yes = best_ask;
                self.spread_yes = spread;
            }
            Side::No => {
                self.best_bid_no = best_bid;
                self.best_ask_no = best_ask;
                self.spread_no = spread;
            }
        }
        self.last_update = Utc::now();
    }
}

/// What produced a market update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Rest,
    WsBook,
    WsPrice,
}

/// Published on every mutation of a market's state.
#[derive(Debug, Clone)]
pub struct MarketUpdate {
    pub data: MarketData,
    pub side: Side,
    /// Outright price carried by WS price events; `None` for book updates.
    pub price: Option<Decimal>,
    pub source: UpdateSource,
}

struct CachedBook {
    book: OrderBook,
    fetched_at: Instant,
}

/// Shared market state between scanner, analyzer and strategies.
pub struct MarketCache {
    markets: RwLock<HashMap<String, MarketData>>,
    token_index: RwLock<HashMap<String, (String, Side)>>,
    book_cache: Mutex<HashMap<String, CachedBook>>,
    updates: broadcast::Sender<MarketUpdate>,
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            markets: RwLock::new(HashMap::new()),
            token_index: RwLock::new(HashMap::new()),
            book_cache: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Subscribe to market updates.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketUpdate> {
        self.updates.subscribe()
    }

    /// Read access to the full market map (no copying).
    pub async fn markets(&self) -> RwLockReadGuard<'_, HashMap<String, MarketData>> {
        self.markets.read().await
    }

    pub async fn market_count(&self) -> usize {
        self.markets.read().await.len()
    }

    pub async fn get(&self, market_id: &str) -> Option<MarketData> {
        self.markets.read().await.get(market_id).cloned()
    }

    /// All token ids currently tracked, for feed subscription.
    pub async fn token_ids(&self) -> Vec<String> {
        self.token_index.read().await.keys().cloned().collect()
    }

    pub async fn contains_condition(&self, condition_id: &str) -> bool {
        self.markets
            .read()
            .await
            .values()
            .any(|m| m.market.condition_id == condition_id)
    }

    /// Resolve a token id to its market and side.
    pub async fn lookup_token(&self, token_id: &str) -> Option<(String, Side)> {
        self.token_index.read().await.get(token_id).cloned()
    }

    /// Insert a newly discovered market. Returns false if already known.
    pub async fn insert_market(&self, market: Market) -> bool {
        let mut markets = self.markets.write().await;
        if markets.contains_key(&market.id) {
            return false;
        }

        let mut index = self.token_index.write().await;
        index.insert(market.token_yes_id.clone(), (market.id.clone(), Side::Yes));
        index.insert(market.token_no_id.clone(), (market.id.clone(), Side::No));

        debug!("Tracking new market: {}", market.question);
        markets.insert(market.id.clone(), MarketData::new(market));
        true
    }

    /// Drop a market the exchange reports inactive.
    pub async fn remove_market(&self, market_id: &str) -> Option<MarketData> {
        let mut markets = self.markets.write().await;
        let removed = markets.remove(market_id)?;

        let mut index = self.token_index.write().await;
        index.remove(&removed.market.token_yes_id);
        index.remove(&removed.market.token_no_id);

        debug!("Removed market: {}", removed.market.question);
        Some(removed)
    }

    /// Refresh market metadata (prices, volume, liquidity) from discovery.
    pub async fn refresh_metadata(&self, market: &Market) {
        let mut markets = self.markets.write().await;
        if let Some(data) = markets.get_mut(&market.id) {
            data.market.price_yes = market.price_yes;
            data.market.price_no = market.price_no;
            data.market.volume = market.volume;
            data.market.liquidity = market.liquidity;
            data.market.end_date = market.end_date;
            data.market.is_active = market.is_active;
        }
    }

    /// Apply a top-of-book update for one token. REST refreshes and WS
    /// book events both land here; last writer wins on `last_update`.
    pub async fn apply_book_update(
        &self,
        token_id: &str,
        best_bid: Option<Decimal>,
        best_ask: Option<Decimal>,
        source: UpdateSource,
    ) -> Option<MarketData> {
        let (market_id, side) = self.lookup_token(token_id).await?;

        let mut markets = self.markets.write().await;
        let data = markets.get_mut(&market_id)?;
        data.apply_book(side, best_bid, best_ask);
        let snapshot = data.clone();
        drop(markets);

        let _ = self.updates.send(MarketUpdate {
            data: snapshot.clone(),
            side,
            price: None,
            source,
        });
        Some(snapshot)
    }

    /// Apply an outright price update for one token.
    pub async fn apply_price_update(
        &self,
        token_id: &str,
        price: Decimal,
    ) -> Option<MarketUpdate> {
        let (market_id, side) = self.lookup_token(token_id).await?;

        let mut markets = self.markets.write().await;
        let data = markets.get_mut(&market_id)?;
        match side {
            Side::Yes => data.market.price_yes = price,
            Side::No => data.market.price_no = price,
        }
        data.last_update = Utc::now();
        let snapshot = data.clone();
        drop(markets);

        let update = MarketUpdate {
            data: snapshot,
            side,
            price: Some(price),
            source: UpdateSource::WsPrice,
        };
        let _ = self.updates.send(update.clone());
        Some(update)
    }

    /// Serve a recently fetched orderbook, if still within TTL.
    pub async fn cached_book(&self, token_id: &str) -> Option<OrderBook> {
        let cache = self.book_cache.lock().await;
        let entry = cache.get(token_id)?;
        if entry.fetched_at.elapsed() < BOOK_CACHE_TTL {
            Some(entry.book.clone())
        } else {
            None
        }
    }

    /// Store a freshly fetched orderbook.
    pub async fn store_book(&self, token_id: &str, book: OrderBook) {
        let mut cache = self.book_cache.lock().await;
        cache.insert(
            token_id.to_string(),
            CachedBook {
                book,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PriceLevel;
    use rust_decimal_macros::dec;

    fn market(id: &str) -> Market {
        Market {
            id: id.to_string(),
            condition_id: format!("cond-{id}"),
            question: format!("Market {id}?"),
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

    #[tokio::test]
    async fn test_insert_builds_token_index() {
        let cache = MarketCache::new();
        assert!(cache.insert_market(market("m1")).await);
        assert!(!cache.insert_market(market("m1")).await);

        assert_eq!(
            cache.lookup_token("m1-yes").await,
            Some(("m1".to_string(), Side::Yes))
        );
        assert_eq!(
            cache.lookup_token("m1-no").await,
            Some(("m1".to_string(), Side::No))
        );
        assert_eq!(cache.market_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_clears_token_index() {
        let cache = MarketCache::new();
        cache.insert_market(market("m1")).await;
        cache.remove_market("m1").await;

        assert_eq!(cache.lookup_token("m1-yes").await, None);
        assert_eq!(cache.market_count().await, 0);
    }

    #[tokio::test]
    async fn test_book_update_recomputes_spread_before_publish() {
        let cache = MarketCache::new();
        cache.insert_market(market("m1")).await;
        let mut rx = cache.subscribe();

        let data = cache
            .apply_book_update("m1-yes", Some(dec!(0.44)), Some(dec!(0.48)), UpdateSource::Rest)
            .await
            .unwrap();

        assert_eq!(data.spread_yes, Some(dec!(0.04)));
        assert!(data.is_valid());

        let update = rx.recv().await.unwrap();
        assert_eq!(update.side, Side::Yes);
        assert_eq!(update.data.spread_yes, Some(dec!(0.04)));
    }

    #[tokio::test]
    async fn test_spread_none_when_side_incomplete() {
        let cache = MarketCache::new();
        cache.insert_market(market("m1")).await;

        let data = cache
            .apply_book_update("m1-no", Some(dec!(0.50)), None, UpdateSource::WsBook)
            .await
            .unwrap();

        assert_eq!(data.spread_no, None);
        assert!(!data.is_valid());
    }

    #[tokio::test]
    async fn test_effective_spread_averages_present_sides() {
        let cache = MarketCache::new();
        cache.insert_market(market("m1")).await;

        cache
            .apply_book_update("m1-yes", Some(dec!(0.40)), Some(dec!(0.46)), UpdateSource::Rest)
            .await;
        let data = cache
            .apply_book_update("m1-no", Some(dec!(0.50)), Some(dec!(0.54)), UpdateSource::Rest)
            .await
            .unwrap();

        // (0.06 + 0.04) / 2
        assert_eq!(data.effective_spread(), dec!(0.05));
    }

    #[tokio::test]
    async fn test_price_update_routes_by_token_side() {
        let cache = MarketCache::new();
        cache.insert_market(market("m1")).await;

        let update = cache.apply_price_update("m1-no", dec!(0.61)).await.unwrap();
        assert_eq!(update.side, Side::No);
        assert_eq!(update.price, Some(dec!(0.61)));
        assert_eq!(update.data.market.price_no, dec!(0.61));
        assert_eq!(update.source, UpdateSource::WsPrice);
    }

    #[tokio::test]
    async fn test_book_cache_ttl() {
        let cache = MarketCache::new();
        let book = OrderBook {
            bids: vec![PriceLevel {
                price: dec!(0.45),
                size: dec!(10),
            }],
            asks: vec![],
        };

        cache.store_book("tok", book).await;
        assert!(cache.cached_book("tok").await.is_some());
        assert!(cache.cached_book("other").await.is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(cache.cached_book("tok").await.is_none());
    }
}
