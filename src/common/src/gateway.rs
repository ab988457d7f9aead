//! Exchange gateway contract for testable trading.
//!
//! This module provides a trait abstraction over the exchange's REST API,
//! allowing the decision core to be driven by a mock implementation in
//! tests. The gateway performs no business logic and holds no per-market
//! state.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Market, OrderBook};

/// Categorized gateway failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("client error (status {status}): {message}")]
    Status4xx { status: u16, message: String },

    #[error("server error (status {status})")]
    Status5xx { status: u16 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited,
}

impl GatewayError {
    /// Transport failures and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::Status5xx { .. }
        )
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Gtc,
    Fok,
}

/// Limit order parameters.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(rename = "type")]
    pub order_type: OrderType,
}

impl OrderRequest {
    /// GTC buy order, the common case for accumulation strategies.
    pub fn buy(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: OrderSide::Buy,
            price,
            size,
            order_type: OrderType::Gtc,
        }
    }

    /// GTC sell order, used when closing positions.
    pub fn sell(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: OrderSide::Sell,
            price,
            size,
            order_type: OrderType::Gtc,
        }
    }
}

/// Order placement acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// Market discovery query.
#[derive(Debug, Clone)]
pub struct MarketQuery {
    /// Keywords matched against the market question.
    pub keywords: Vec<String>,
    /// Only return active markets.
    pub active_only: bool,
}

impl MarketQuery {
    pub fn keywords(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.to_vec(),
            active_only: true,
        }
    }
}

/// Trait over exchange operations - mockable for testing.
///
/// Implementations:
/// - `ClobRestClient`: real REST client for production
/// - `MockExchangeGateway`: auto-generated mock for unit tests
/// - scripted fakes in the engine's tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Discover markets matching the query.
    async fn list_markets(&self, query: &MarketQuery) -> Result<Vec<Market>, GatewayError>;

    /// Fetch full market details. Returns `None` when the exchange reports 404.
    async fn get_market(&self, condition_id: &str) -> Result<Option<Market>, GatewayError>;

    /// Fetch the orderbook for one outcome token.
    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook, GatewayError>;

    /// Place a limit order.
    async fn place_limit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Cancel an order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// Cancel all resting orders.
    async fn cancel_all(&self) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_kinds() {
        assert!(GatewayError::Transport("refused".to_string()).is_retryable());
        assert!(GatewayError::Status5xx { status: 502 }.is_retryable());
        assert!(!GatewayError::Status4xx {
            status: 400,
            message: "bad".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::RateLimited.is_retryable());
        assert!(!GatewayError::Auth("denied".to_string()).is_retryable());
    }

    #[test]
    fn test_order_request_serializes_wire_shape() {
        let req = OrderRequest::buy("token-1", dec!(0.45), dec!(55.55));
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["side"], "BUY");
        assert_eq!(json["type"], "GTC");
        assert_eq!(json["token_id"], "token-1");
    }

    #[tokio::test]
    async fn test_mock_gateway_roundtrip() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_place_limit_order().returning(|_| {
            Ok(OrderAck {
                id: "order-1".to_string(),
                status: "live".to_string(),
            })
        });

        let ack = mock
            .place_limit_order(&OrderRequest::buy("t", dec!(0.5), dec!(10)))
            .await
            .unwrap();
        assert_eq!(ack.id, "order-1");
    }
}
