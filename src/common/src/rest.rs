//! REST client for the CLOB exchange API.
//!
//! Covers market discovery, per-market details, orderbook tops and order
//! placement. Retry policy: transport failures and 5xx responses are
//! retried up to 3 attempts with a short backoff; 4xx responses surface
//! immediately; 404 on market lookup means absence, not failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::gateway::{
    ExchangeGateway, GatewayError, MarketQuery, OrderAck, OrderRequest,
};
use crate::models::{Market, OrderBook, PriceLevel};

const MAX_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const PAGE_LIMIT: usize = 100;
const MAX_PAGES: usize = 50;

/// Raw market data from the exchange. Numeric fields arrive as JSON
/// numbers and are converted to `Decimal` during parsing.
#[derive(Debug, Clone, Deserialize)]
struct RawMarket {
    #[serde(alias = "market_id")]
    id: String,
    condition_id: String,
    question: String,
    #[serde(default)]
    tokens: Vec<RawToken>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    liquidity: Option<f64>,
    #[serde(default, alias = "end_date")]
    end_date_iso: Option<String>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    closed: Option<bool>,
}

/// Outcome token nested in a market.
#[derive(Debug, Clone, Deserialize)]
struct RawToken {
    outcome: String,
    token_id: String,
    #[serde(default)]
    price: Option<f64>,
}

impl RawToken {
    fn is_yes(&self) -> bool {
        matches!(self.outcome.to_lowercase().as_str(), "yes" | "up")
    }

    fn is_no(&self) -> bool {
        matches!(self.outcome.to_lowercase().as_str(), "no" | "down")
    }
}

/// Paginated market list response.
#[derive(Debug, Deserialize)]
struct MarketsPage {
    data: Vec<RawMarket>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Raw orderbook from the exchange, prices and sizes as strings.
#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

/// REST client over the exchange's public and order endpoints.
pub struct ClobRestClient {
    client: Client,
    base_url: String,
}

impl ClobRestClient {
    /// Create a new REST client.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.clone(),
        })
    }

    /// Classify a non-success response into a gateway error.
    async fn classify(response: Response) -> GatewayError {
        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                GatewayError::Auth(format!("status {}", status.as_u16()))
            }
            s if s.is_server_error() => GatewayError::Status5xx {
                status: s.as_u16(),
            },
            s => {
                let message = response.text().await.unwrap_or_default();
                GatewayError::Status4xx {
                    status: s.as_u16(),
                    message,
                }
            }
        }
    }

    /// Send a request with the retry policy applied.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let mut last_error = GatewayError::Transport("no attempts made".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            let result = build().send().await;

            let error = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => Self::classify(response).await,
                Err(e) => GatewayError::Transport(e.to_string()),
            };

            if !error.is_retryable() || attempt == MAX_ATTEMPTS {
                return Err(error);
            }

            let backoff = match error {
                GatewayError::Status5xx { .. } => Duration::from_millis(500 * attempt as u64),
                _ => Duration::from_secs(attempt as u64),
            };
            debug!(
                "Request attempt {}/{} failed ({}), retrying in {:?}",
                attempt, MAX_ATTEMPTS, error, backoff
            );
            last_error = error;
            sleep(backoff).await;
        }

        Err(last_error)
    }

    /// Parse a raw market into the shared model.
    ///
    /// Requires a binary market: exactly one YES and one NO token, active,
    /// not closed and not expired.
    fn parse_market(raw: RawMarket) -> Option<Market> {
        if !raw.active.unwrap_or(false) || raw.closed.unwrap_or(false) {
            return None;
        }

        if raw.tokens.len() != 2 {
            debug!(
                "Skipping market with {} tokens: {}",
                raw.tokens.len(),
                raw.question
            );
            return None;
        }

        let yes = raw.tokens.iter().find(|t| t.is_yes())?;
        let no = raw.tokens.iter().find(|t| t.is_no())?;

        let end_date = raw
            .end_date_iso
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        if let Some(end) = end_date {
            if end <= Utc::now() {
                debug!("Skipping expired market: {}", raw.question);
                return None;
            }
        }

        let to_decimal = |v: Option<f64>| {
            v.and_then(|f| Decimal::try_from(f).ok()).unwrap_or_default()
        };

        Some(Market {
            id: raw.id,
            condition_id: raw.condition_id,
            question: raw.question,
            token_yes_id: yes.token_id.clone(),
            token_no_id: no.token_id.clone(),
            price_yes: to_decimal(yes.price),
            price_no: to_decimal(no.price),
            volume: to_decimal(raw.volume),
            liquidity: to_decimal(raw.liquidity),
            end_date,
            is_active: true,
        })
    }

    fn parse_book(raw: RawBook) -> OrderBook {
        let parse_levels = |levels: Vec<RawLevel>| {
            levels
                .into_iter()
                .filter_map(|l| {
                    Some(PriceLevel {
                        price: l.price.parse().ok()?,
                        size: l.size.parse().ok()?,
                    })
                })
                .collect()
        };

        OrderBook {
            bids: parse_levels(raw.bids),
            asks: parse_levels(raw.asks),
        }
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for ClobRestClient {
    async fn list_markets(&self, query: &MarketQuery) -> Result<Vec<Market>, GatewayError> {
        let url = format!("{}/markets", self.base_url);
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let response = self
                .send_with_retry(|| {
                    let mut req = self
                        .client
                        .get(&url)
                        .query(&[("limit", PAGE_LIMIT.to_string())]);
                    if query.active_only {
                        req = req.query(&[("active", "true")]);
                    }
                    if let Some(ref c) = cursor {
                        req = req.query(&[("next_cursor", c.clone())]);
                    }
                    req
                })
                .await?;

            let page: MarketsPage = response
                .json()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;

            let page_len = page.data.len();
            markets.extend(page.data.into_iter().filter_map(Self::parse_market));

            cursor = page.next_cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || page_len < PAGE_LIMIT {
                break;
            }
        }

        if !query.keywords.is_empty() {
            markets.retain(|m| m.matches_keywords(&query.keywords));
        }

        debug!("Discovered {} markets matching query", markets.len());
        Ok(markets)
    }

    async fn get_market(&self, condition_id: &str) -> Result<Option<Market>, GatewayError> {
        let url = format!("{}/markets/{}", self.base_url, condition_id);

        let result = self.send_with_retry(|| self.client.get(&url)).await;

        match result {
            Ok(response) => {
                let raw: RawMarket = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Transport(e.to_string()))?;
                Ok(Self::parse_market(raw))
            }
            Err(GatewayError::Status4xx { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook, GatewayError> {
        let url = format!("{}/book", self.base_url);

        let response = self
            .send_with_retry(|| self.client.get(&url).query(&[("token_id", token_id)]))
            .await?;

        let raw: RawBook = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self::parse_book(raw))
    }

    async fn place_limit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let url = format!("{}/order", self.base_url);

        // Order placement is not retried: a timed-out POST may still have
        // been accepted by the exchange.
        let response = self.client.post(&url).json(request).send().await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => return Err(Self::classify(r).await),
            Err(e) => return Err(GatewayError::Transport(e.to_string())),
        };

        let ack: OrderAck = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!(
            "Placed {:?} {} @ {} on {}: order {}",
            request.side, request.size, request.price, request.token_id, ack.id
        );
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/order/{}", self.base_url, order_id);
        self.send_with_retry(|| self.client.delete(&url)).await?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), GatewayError> {
        let url = format!("{}/orders", self.base_url);
        self.send_with_retry(|| self.client.delete(&url)).await?;
        warn!("Cancelled all resting orders");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_market(outcomes: [&str; 2]) -> RawMarket {
        RawMarket {
            id: "m1".to_string(),
            condition_id: "c1".to_string(),
            question: "Will BTC go up?".to_string(),
            tokens: vec![
                RawToken {
                    outcome: outcomes[0].to_string(),
                    token_id: "t1".to_string(),
                    price: Some(0.55),
                },
                RawToken {
                    outcome: outcomes[1].to_string(),
                    token_id: "t2".to_string(),
                    price: Some(0.45),
                },
            ],
            volume: Some(20000.0),
            liquidity: Some(5000.0),
            end_date_iso: None,
            active: Some(true),
            closed: Some(false),
        }
    }

    #[test]
    fn test_parse_market_maps_outcomes() {
        let market = ClobRestClient::parse_market(raw_market(["Yes", "No"])).unwrap();
        assert_eq!(market.token_yes_id, "t1");
        assert_eq!(market.token_no_id, "t2");
        assert_eq!(market.price_yes, Decimal::try_from(0.55).unwrap());
        assert_eq!(market.volume, Decimal::try_from(20000.0).unwrap());
    }

    #[test]
    fn test_parse_market_accepts_up_down() {
        let market = ClobRestClient::parse_market(raw_market(["Up", "Down"])).unwrap();
        assert_eq!(market.token_yes_id, "t1");
        assert_eq!(market.token_no_id, "t2");
    }

    #[test]
    fn test_parse_market_rejects_inactive() {
        let mut raw = raw_market(["Yes", "No"]);
        raw.active = Some(false);
        assert!(ClobRestClient::parse_market(raw).is_none());
    }

    #[test]
    fn test_parse_market_rejects_expired() {
        let mut raw = raw_market(["Yes", "No"]);
        raw.end_date_iso = Some("2020-01-01T00:00:00Z".to_string());
        assert!(ClobRestClient::parse_market(raw).is_none());
    }

    #[test]
    fn test_parse_market_rejects_non_binary() {
        let mut raw = raw_market(["Yes", "No"]);
        raw.tokens.pop();
        assert!(ClobRestClient::parse_market(raw).is_none());
    }

    #[test]
    fn test_parse_book_drops_malformed_levels() {
        let raw = RawBook {
            bids: vec![
                RawLevel {
                    price: "0.45".to_string(),
                    size: "100".to_string(),
                },
                RawLevel {
                    price: "garbage".to_string(),
                    size: "1".to_string(),
                },
            ],
            asks: vec![RawLevel {
                price: "0.47".to_string(),
                size: "50".to_string(),
            }],
        };

        let book = ClobRestClient::parse_book(raw);
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.best_bid(), Some(Decimal::new(45, 2)));
        assert_eq!(book.best_ask(), Some(Decimal::new(47, 2)));
    }
}
