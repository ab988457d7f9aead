//! External volatility feed.
//!
//! Polls a public crypto market-data API and condenses 24h ranges into a
//! single 0-100 volatility score. The API is rate limited, so the cached
//! score is authoritative: on 429 the last-known value is served even
//! past its TTL, and the default is only used before the first
//! successful fetch.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;

const CACHE_TTL: Duration = Duration::from_secs(60);
const MIN_CALL_SPACING: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Neutral score used before any successful fetch.
pub const DEFAULT_SCORE: f64 = 50.0;

/// Tracked assets: (symbol, API id).
const ASSETS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
];

/// Raw quote from the market-data API.
#[derive(Debug, Deserialize)]
struct RawQuote {
    id: String,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    high_24h: Option<f64>,
    #[serde(default)]
    low_24h: Option<f64>,
}

impl RawQuote {
    /// 0-100 score from the 24h range: a 20% range maps to 100.
    fn volatility_score(&self) -> Option<f64> {
        let price = self.current_price?;
        if price <= 0.0 {
            return None;
        }
        let range_pct = (self.high_24h? - self.low_24h?) / price * 100.0;
        Some(range_pct.min(20.0) * 5.0)
    }
}

#[derive(Debug)]
struct ScoreCache {
    score: f64,
    has_value: bool,
    fetched_at: Option<Instant>,
    last_call: Option<Instant>,
}

enum FetchError {
    RateLimited,
    Other(String),
}

/// Rate-limited volatility feed with a shared cache.
pub struct VolatilityFeed {
    client: Client,
    base_url: String,
    cache: Mutex<ScoreCache>,
}

impl VolatilityFeed {
    /// Create a new volatility feed.
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.volatility_api_url.clone(),
            cache: Mutex::new(ScoreCache {
                score: DEFAULT_SCORE,
                has_value: false,
                fetched_at: None,
                last_call: None,
            }),
        }
    }

    /// Current volatility score (0-100).
    ///
    /// Serves the cached value when fresh or when the feed is rate
    /// limited; falls back to [`DEFAULT_SCORE`] before the first fetch.
    pub async fn score(&self) -> f64 {
        let mut cache = self.cache.lock().await;

        if let Some(at) = cache.fetched_at {
            if at.elapsed() < CACHE_TTL {
                return cache.score;
            }
        }

        // Minimum spacing between upstream calls
        if let Some(last) = cache.last_call {
            if last.elapsed() < MIN_CALL_SPACING {
                return cache.score;
            }
        }
        cache.last_call = Some(Instant::now());

        match self.fetch_score().await {
            Ok(score) => {
                cache.score = score;
                cache.has_value = true;
                cache.fetched_at = Some(Instant::now());
                debug!("Volatility score refreshed: {:.1}", score);
                score
            }
            Err(FetchError::RateLimited) => {
                // Serve stale even past TTL rather than hammering the API
                debug!("Volatility feed rate limited, serving cached score");
                cache.score
            }
            Err(FetchError::Other(e)) => {
                if cache.has_value {
                    debug!("Volatility fetch failed ({}), serving cached score", e);
                } else {
                    warn!("Volatility fetch failed ({}), using default score", e);
                }
                cache.score
            }
        }
    }

    async fn fetch_score(&self) -> Result<f64, FetchError> {
        let ids: Vec<&str> = ASSETS.iter().map(|(_, id)| *id).collect();
        let url = format!("{}/coins/markets", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("vs_currency", "usd"), ("ids", &ids.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::Other(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FetchError::Other(format!("status {}", response.status())));
        }

        let quotes: Vec<RawQuote> = response
            .json()
            .await
            .map_err(|e| FetchError::Other(e.to_string()))?;

        let scores: Vec<f64> = quotes
            .iter()
            .filter(|q| ASSETS.iter().any(|(_, id)| *id == q.id))
            .filter_map(|q| q.volatility_score())
            .collect();

        if scores.is_empty() {
            return Err(FetchError::Other("no usable quotes".to_string()));
        }

        Ok(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
