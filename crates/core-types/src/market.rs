use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A point-in-time price snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub interval: String,
}

/// The market snapshot handed to a strategy on each tick: either a single
/// ticker or a window of recent candles, depending on what the strategy asked
/// for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MarketData {
    Ticker(Ticker),
    Candles(Vec<Kline>),
}

impl MarketData {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketData::Ticker(t) => Some(&t.symbol),
            MarketData::Candles(_) => None,
        }
    }

    /// The most recent traded price in the snapshot, if any.
    pub fn last_price(&self) -> Option<Decimal> {
        match self {
            MarketData::Ticker(t) => Some(t.price),
            MarketData::Candles(candles) => candles.last().map(|k| k.close),
        }
    }
}
