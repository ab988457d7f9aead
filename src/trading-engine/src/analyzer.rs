//! Opportunity analyzer.
//!
//! Scores valid markets on spread, volume, liquidity and price balance,
//! and recommends an action for each. Stateless apart from a monotonic
//! opportunity counter.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::RwLock;

use common::{clip_price, TradingParams};

use crate::cache::MarketData;

/// Recommended action for an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityAction {
    Trade,
    Watch,
    Skip,
}

/// Points awarded per scoring axis (0-25 each).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreBreakdown {
    pub spread: u8,
    pub volume: u8,
    pub liquidity: u8,
    pub balance: u8,
    pub total: u8,
}

/// A scored trading opportunity. Ephemeral: recreated on each scan.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub market_id: String,
    pub question: String,
    pub token_yes_id: String,
    pub token_no_id: String,

    pub best_bid_yes: Decimal,
    pub best_ask_yes: Decimal,
    pub best_bid_no: Decimal,
    pub best_ask_no: Decimal,
    pub spread_yes: Decimal,
    pub spread_no: Decimal,
    pub effective_spread: Decimal,

    /// Suggested quote prices: best bid plus the configured offset.
    pub recommended_price_yes: Decimal,
    pub recommended_price_no: Decimal,

    pub volume: Decimal,
    pub liquidity: Decimal,

    /// 1-5 stars.
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub action: OpportunityAction,

    pub detected_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    /// Conservative estimate of capturable edge per share.
    pub fn potential_profit_per_share(&self) -> Decimal {
        self.effective_spread / dec!(2)
    }
}

/// Market analyzer, parameterized by the live trading params.
pub struct OpportunityAnalyzer {
    params: RwLock<TradingParams>,
    counter: AtomicU64,
}

impl OpportunityAnalyzer {
    pub fn new(params: TradingParams) -> Self {
        Self {
            params: RwLock::new(params),
            counter: AtomicU64::new(0),
        }
    }

    pub async fn params(&self) -> TradingParams {
        self.params.read().await.clone()
    }

    pub async fn update_params(&self, params: TradingParams) {
        *self.params.write().await = params;
    }

    /// Analyze one market. Returns `None` when the market fails the
    /// validity, spread or volume filters.
    pub async fn analyze_market(&self, data: &MarketData) -> Option<Opportunity> {
        let params = self.params.read().await.clone();
        self.analyze_with_params(data, &params)
    }

    fn analyze_with_params(&self, data: &MarketData, params: &TradingParams) -> Option<Opportunity> {
        if !data.is_valid() {
            return None;
        }

        let spread_yes = data.spread_yes.unwrap_or_default();
        let spread_no = data.spread_no.unwrap_or_default();
        let effective_spread = data.effective_spread();

        if effective_spread < params.min_spread || effective_spread > params.max_spread {
            return None;
        }

        let market = &data.market;
        if market.volume < params.min_volume_usd {
            return None;
        }

        let recommended_price_yes =
            clip_price(data.best_bid_yes.unwrap_or_default() + params.order_offset);
        let recommended_price_no =
            clip_price(data.best_bid_no.unwrap_or_default() + params.order_offset);

        let breakdown = score_market(effective_spread, market.volume, market.liquidity, market.price_yes);
        let score = final_score(breakdown.total);

        let action = match score {
            4 | 5 => OpportunityAction::Trade,
            3 => OpportunityAction::Watch,
            _ => OpportunityAction::Skip,
        };

        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;

        Some(Opportunity {
            id: format!("opp-{seq}"),
            market_id: market.id.clone(),
            question: market.question.clone(),
            token_yes_id: market.token_yes_id.clone(),
            token_no_id: market.token_no_id.clone(),
            best_bid_yes: data.best_bid_yes.unwrap_or_default(),
            best_ask_yes: data.best_ask_yes.unwrap_or_default(),
            best_bid_no: data.best_bid_no.unwrap_or_default(),
            best_ask_no: data.best_ask_no.unwrap_or_default(),
            spread_yes,
            spread_no,
            effective_spread,
            recommended_price_yes,
            recommended_price_no,
            volume: market.volume,
            liquidity: market.liquidity,
            score,
            breakdown,
            action,
            detected_at: Utc::now(),
            expires_at: market.end_date,
        })
    }

    /// Analyze all markets, ranked by (score, effective spread) descending.
    pub async fn analyze_all<'a, I>(&self, markets: I) -> Vec<Opportunity>
    where
        I: IntoIterator<Item = &'a MarketData>,
    {
        let params = self.params.read().await.clone();
        let mut opportunities: Vec<Opportunity> = markets
            .into_iter()
            .filter_map(|m| self.analyze_with_params(m, &params))
            .collect();

        opportunities.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.effective_spread.cmp(&a.effective_spread))
        });
        opportunities
    }

    /// Only the opportunities recommended for immediate trading.
    pub async fn tradeable<'a, I>(&self, markets: I) -> Vec<Opportunity>
    where
        I: IntoIterator<Item = &'a MarketData>,
    {
        self.analyze_all(markets)
            .await
            .into_iter()
            .filter(|o| o.action == OpportunityAction::Trade)
            .collect()
    }

    /// Final gate before auto-execution.
    pub async fn should_trade(&self, opportunity: &Opportunity) -> bool {
        let params = self.params.read().await;
        params.auto_trading_enabled
            && opportunity.action == OpportunityAction::Trade
            && opportunity.score >= 4
    }
}

/// Score one market across the four axes.
fn score_market(
    effective_spread: Decimal,
    volume: Decimal,
    liquidity: Decimal,
    price_yes: Decimal,
) -> ScoreBreakdown {
    let spread = band(
        effective_spread,
        &[
            (dec!(0.10), 25),
            (dec!(0.08), 20),
            (dec!(0.06), 15),
            (dec!(0.04), 10),
        ],
    );
    let volume = band(
        volume,
        &[
            (dec!(100000), 25),
            (dec!(50000), 20),
            (dec!(20000), 15),
            (dec!(5000), 10),
        ],
    );
    let liquidity = band(
        liquidity,
        &[
            (dec!(50000), 25),
            (dec!(20000), 20),
            (dec!(10000), 15),
            (dec!(5000), 10),
        ],
    );

    // Balance: prices near 0.50 mean an undecided market with more
    // two-way flow. Scored on distance from the midpoint.
    let distance = (price_yes - dec!(0.50)).abs();
    let balance = if distance <= dec!(0.10) {
        25
    } else if distance <= dec!(0.20) {
        20
    } else if distance <= dec!(0.30) {
        15
    } else if distance <= dec!(0.40) {
        10
    } else {
        5
    };

    ScoreBreakdown {
        spread,
        volume,
        liquidity,
        balance,
        total: spread + volume + liquidity + balance,
    }
}

/// Points for the first band whose threshold the value meets; 5 otherwise.
fn band(value: Decimal, bands: &[(Decimal, u8)]) -> u8 {
    for (threshold, points) in bands {
        if value >= *threshold {
            return *points;
        }
    }
    5
}

/// Map total points (max 100) to a 1-5 star score.
fn final_score(total: u8) -> u8 {
    if total >= 80 {
        5
    } else if total >= 60 {
        4
    } else if total >= 40 {
        3
    } else if total >= 20 {
        2
    } else {
        1
    }
}
