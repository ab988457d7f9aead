//! WebSocket feed for real-time price and orderbook updates.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::Config;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBE_BATCH_SIZE: usize = 100;

/// The feed's underlying socket type.
pub type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionError(#[from] WsError),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,
}

/// Price update for one outcome token.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceUpdateMsg {
    #[serde(alias = "asset_id")]
    pub token_id: String,
    pub price: String,
}

impl PriceUpdateMsg {
    pub fn price_decimal(&self) -> Option<Decimal> {
        self.price.parse().ok()
    }
}

/// Price level on the wire, price and size as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLevel {
    pub price: String,
    pub size: String,
}

impl WireLevel {
    pub fn price_decimal(&self) -> Option<Decimal> {
        self.price.parse().ok()
    }

    pub fn size_decimal(&self) -> Option<Decimal> {
        self.size.parse().ok()
    }
}

/// Orderbook snapshot for one outcome token.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMsg {
    #[serde(alias = "asset_id")]
    pub token_id: String,
    /// Bids (buy orders). May be named "buys" in some API versions.
    #[serde(default, alias = "buys")]
    pub bids: Vec<WireLevel>,
    /// Asks (sell orders). May be named "sells" in some API versions.
    #[serde(default, alias = "sells")]
    pub asks: Vec<WireLevel>,
}

impl BookMsg {
    /// Best bid price (highest bid). Does not rely on API sort order.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().filter_map(|l| l.price_decimal()).max()
    }

    /// Best ask price (lowest ask). Does not rely on API sort order.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().filter_map(|l| l.price_decimal()).min()
    }
}

/// Executed trade notification.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMsg {
    #[serde(alias = "asset_id")]
    pub token_id: String,
    pub price: String,
    pub size: String,
    pub side: String,
}

/// Enum of all feed messages the engine consumes.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    PriceUpdate(PriceUpdateMsg),
    Book(BookMsg),
    /// Batch of book snapshots (initial subscription response)
    Books(Vec<BookMsg>),
    Trade(TradeMsg),
    Heartbeat,
    Error(String),
    Unknown(String),
}

/// Parse a raw WebSocket text frame into a FeedMessage.
pub fn parse_message(text: &str) -> FeedMessage {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        // Array responses are batches of book snapshots
        if let Some(arr) = value.as_array() {
            let books: Vec<BookMsg> = arr
                .iter()
                .filter_map(|v| {
                    if matches!(message_type(v), Some("book") | Some("book_update")) {
                        serde_json::from_value::<BookMsg>(v.clone()).ok()
                    } else {
                        None
                    }
                })
                .collect();
            if !books.is_empty() {
                return FeedMessage::Books(books);
            }
            return FeedMessage::Heartbeat;
        }

        if let Some(msg_type) = message_type(&value) {
            match msg_type {
                "price" | "price_update" => {
                    if let Ok(msg) = serde_json::from_value::<PriceUpdateMsg>(value) {
                        return FeedMessage::PriceUpdate(msg);
                    }
                }
                "book" | "book_update" => {
                    if let Ok(msg) = serde_json::from_value::<BookMsg>(value) {
                        return FeedMessage::Book(msg);
                    }
                }
                "trade" => {
                    if let Ok(msg) = serde_json::from_value::<TradeMsg>(value) {
                        return FeedMessage::Trade(msg);
                    }
                }
                "heartbeat" => return FeedMessage::Heartbeat,
                "error" => {
                    let message = value
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("feed error")
                        .to_string();
                    return FeedMessage::Error(message);
                }
                _ => {}
            }
        }
    }

    if text == "ping" {
        return FeedMessage::Heartbeat;
    }

    FeedMessage::Unknown(text.to_string())
}

/// Message type from either `type`, `event_type` or `event`.
fn message_type(value: &serde_json::Value) -> Option<&str> {
    value
        .get("type")
        .or_else(|| value.get("event_type"))
        .or_else(|| value.get("event"))
        .and_then(|t| t.as_str())
}

/// Subscription request to the market channel.
#[derive(Debug, Serialize)]
struct SubscribeRequest {
    #[serde(rename = "type")]
    msg_type: String,
    assets_ids: Vec<String>,
}

impl SubscribeRequest {
    fn market(asset_ids: Vec<String>) -> Self {
        Self {
            msg_type: "market".to_string(),
            assets_ids: asset_ids,
        }
    }
}

/// WebSocket feed client with reconnection logic.
pub struct FeedClient {
    ws_url: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl FeedClient {
    /// Create a new feed client.
    pub fn new(config: &Config) -> Self {
        let ws_url = format!("{}/market", config.ws_url);
        Self {
            ws_url,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(10),
        }
    }

    /// Connect to the WebSocket.
    pub async fn connect(&self) -> Result<FeedSocket, FeedError> {
        info!("Connecting to market feed: {}", self.ws_url);

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url))
            .await
            .map_err(|_| FeedError::Timeout)?
            .map_err(FeedError::ConnectionError)?;

        info!("Connected to market feed");
        Ok(ws_stream)
    }

    /// Connect with exponential backoff retry.
    pub async fn connect_with_retry(
        &self,
        max_attempts: u32,
    ) -> Result<FeedSocket, FeedError> {
        let mut delay = self.reconnect_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.connect().await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if attempts >= max_attempts {
                        error!("Failed to connect after {} attempts", attempts);
                        return Err(e);
                    }

                    warn!(
                        "Connection attempt {} failed: {}. Retrying in {:?}",
                        attempts, e, delay
                    );
                    sleep(delay).await;

                    // Exponential backoff with cap
                    delay = std::cmp::min(delay * 2, self.max_reconnect_delay);
                }
            }
        }
    }

    /// Subscribe to updates for the given tokens.
    /// Subscriptions are batched to avoid hitting server limits.
    pub async fn subscribe(
        &self,
        ws: &mut FeedSocket,
        token_ids: Vec<String>,
    ) -> Result<(), FeedError> {
        let total_batches = token_ids.len().div_ceil(SUBSCRIBE_BATCH_SIZE);

        info!(
            "Subscribing to {} tokens in {} batches",
            token_ids.len(),
            total_batches
        );

        for (batch_num, chunk) in token_ids.chunks(SUBSCRIBE_BATCH_SIZE).enumerate() {
            let request = SubscribeRequest::market(chunk.to_vec());
            let msg =
                serde_json::to_string(&request).map_err(|e| FeedError::ParseError(e.to_string()))?;

            debug!(
                "Sending subscription batch {}/{} ({} tokens)",
                batch_num + 1,
                total_batches,
                chunk.len()
            );
            ws.send(Message::Text(msg.into()))
                .await
                .map_err(FeedError::ConnectionError)?;

            if batch_num + 1 < total_batches {
                sleep(Duration::from_millis(100)).await;
            }
        }

        Ok(())
    }

    /// Read the next message from the WebSocket.
    pub async fn read_message(
        &self,
        ws: &mut FeedSocket,
    ) -> Result<Option<FeedMessage>, FeedError> {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(parse_message(&text))),
            Some(Ok(Message::Ping(data))) => {
                ws.send(Message::Pong(data))
                    .await
                    .map_err(FeedError::ConnectionError)?;
                Ok(Some(FeedMessage::Heartbeat))
            }
            Some(Ok(Message::Close(_))) => {
                info!("Market feed closed by server");
                Err(FeedError::ChannelClosed)
            }
            Some(Ok(_)) => Ok(None), // Binary, Pong, Frame - ignore
            Some(Err(e)) => Err(FeedError::ConnectionError(e)),
            None => Err(FeedError::ChannelClosed),
        }
    }

    /// Send a ping to keep the connection alive.
    pub async fn send_ping(
        &self,
        ws: &mut FeedSocket,
    ) -> Result<(), FeedError> {
        ws.send(Message::Ping(vec![].into()))
            .await
            .map_err(FeedError::ConnectionError)?;
        debug!("Sent keepalive ping");
        Ok(())
    }
}
