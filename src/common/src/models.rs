//! Shared data models for markets and orderbooks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// A binary prediction market discovered on the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub condition_id: String,
    pub question: String,
    pub token_yes_id: String,
    pub token_no_id: String,
    pub price_yes: Decimal,
    pub price_no: Decimal,
    pub volume: Decimal,
    pub liquidity: Decimal,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Market {
    /// Token id for the given outcome side.
    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.token_yes_id,
            Side::No => &self.token_no_id,
        }
    }

    /// Check if the market question contains any of the keywords.
    pub fn matches_keywords(&self, keywords: &[String]) -> bool {
        let question = self.question.to_lowercase();
        keywords
            .iter()
            .any(|kw| question.contains(&kw.to_lowercase()))
    }

    /// Check if the market has expired relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date.map(|end| end <= now).unwrap_or(false)
    }
}

/// Clamp a price into the exchange's valid range.
///
/// Binary outcome tokens trade in (0, 1); orders outside [0.01, 0.99]
/// are rejected by the exchange.
pub fn clip_price(price: Decimal) -> Decimal {
    price.clamp(Decimal::new(1, 2), Decimal::new(99, 2))
}

/// A single price level in the orderbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Top-of-book snapshot for one outcome token.
///
/// Bids are expected best-first (descending), asks best-first (ascending),
/// but the accessors do not rely on exchange sort order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Best bid price (highest bid).
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }

    /// Best ask price (lowest ask).
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }

    /// Bid/ask spread, when both sides are quoted.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(question: &str) -> Market {
        Market {
            id: "m1".to_string(),
            condition_id: "c1".to_string(),
            question: question.to_string(),
            token_yes_id: "ty".to_string(),
            token_no_id: "tn".to_string(),
            price_yes: dec!(0.5),
            price_no: dec!(0.5),
            volume: dec!(1000),
            liquidity: dec!(500),
            end_date: None,
            is_active: true,
        }
    }

    #[test]
    fn test_matches_keywords() {
        let m = market("Will BTC go up in the next hour?");
        assert!(m.matches_keywords(&["btc".to_string()]));
        assert!(m.matches_keywords(&["ETH".to_string(), "BTC".to_string()]));
        assert!(!m.matches_keywords(&["SOL".to_string()]));
    }

    #[test]
    fn test_best_prices_ignore_sort_order() {
        let book = OrderBook {
            bids: vec![
                PriceLevel {
                    price: dec!(0.44),
                    size: dec!(10),
                },
                PriceLevel {
                    price: dec!(0.45),
                    size: dec!(5),
                },
            ],
            asks: vec![
                PriceLevel {
                    price: dec!(0.48),
                    size: dec!(7),
                },
                PriceLevel {
                    price: dec!(0.47),
                    size: dec!(3),
                },
            ],
        };

        assert_eq!(book.best_bid(), Some(dec!(0.45)));
        assert_eq!(book.best_ask(), Some(dec!(0.47)));
        assert_eq!(book.spread(), Some(dec!(0.02)));
    }

    #[test]
    fn test_spread_requires_both_sides() {
        let book = OrderBook {
            bids: vec![PriceLevel {
                price: dec!(0.45),
                size: dec!(10),
            }],
            asks: vec![],
        };
        assert_eq!(book.spread(), None);
    }

    #[test]
    fn test_clip_price_bounds() {
        assert_eq!(clip_price(dec!(0.005)), dec!(0.01));
        assert_eq!(clip_price(dec!(1.2)), dec!(0.99));
        assert_eq!(clip_price(dec!(0.45)), dec!(0.45));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }
}
