//! Common library for the trading engine.
//!
//! Provides shared functionality:
//! - Configuration loading from .env
//! - Exchange gateway contract and its REST client
//! - Market data feed (WebSocket)
//! - External volatility feed
//! - Shared data models and persisted trading parameters

pub mod config;
pub mod feed;
pub mod gateway;
pub mod models;
pub mod params;
pub mod rest;
pub mod volatility;

pub use config::Config;
pub use feed::{
    parse_message, BookMsg, FeedClient, FeedError, FeedMessage, FeedSocket, PriceUpdateMsg,
    TradeMsg,
};
pub use gateway::{
    ExchangeGateway, GatewayError, MarketQuery, OrderAck, OrderRequest, OrderSide, OrderType,
};
pub use models::{clip_price, Market, OrderBook, PriceLevel, Side};
pub use params::TradingParams;
pub use rest::ClobRestClient;
pub use volatility::VolatilityFeed;
