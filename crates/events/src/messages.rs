use chrono::{DateTime, Utc};
use core_types::{BotStats, Order, RiskAlert, Ticker, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known per-user channel names plus helpers for the per-symbol market
/// channels.
pub mod channels {
    pub const ORDERS: &str = "orders";
    pub const BOTS: &str = "bots";
    pub const RISK: &str = "risk";

    pub fn ticker(symbol: &str) -> String {
        format!("ticker:{}", symbol)
    }

    pub fn trades(symbol: &str) -> String {
        format!("trades:{}", symbol)
    }

    pub fn orderbook(symbol: &str) -> String {
        format!("orderbook:{}", symbol)
    }
}

/// The stats snapshot broadcast after every trade close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatsPayload {
    pub bot_id: Uuid,
    pub total_pnl: Decimal,
    pub win_rate: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub current_win_streak: i64,
    pub current_loss_streak: i64,
    pub max_win_streak: i64,
    pub max_loss_streak: i64,
}

impl BotStatsPayload {
    pub fn new(bot_id: Uuid, stats: &BotStats) -> Self {
        Self {
            bot_id,
            total_pnl: stats.total_pnl,
            win_rate: stats.win_rate(),
            total_trades: stats.total_trades,
            winning_trades: stats.winning_trades,
            losing_trades: stats.losing_trades,
            current_win_streak: stats.current_win_streak,
            current_loss_streak: stats.current_loss_streak,
            max_win_streak: stats.max_win_streak,
            max_loss_streak: stats.max_loss_streak,
        }
    }
}

/// A level-capped view of one side of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub timestamp: DateTime<Utc>,
}

/// The top-level WebSocket message enum.
///
/// `#[serde(tag = "type", content = "payload")]` serializes each variant into
/// a `{"type": ..., "payload": ...}` object, which is what the frontend
/// dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsMessage {
    /// A change to one of the user's orders.
    OrderUpdate(Order),
    /// Recomputed cumulative stats after a trade close.
    BotStatsUpdate(BotStatsPayload),
    Ticker(Ticker),
    Trade(Trade),
    Orderbook(OrderbookSnapshot),
    RiskAlert(RiskAlert),
    Error { message: String },
    Pong { timestamp: DateTime<Utc> },
    Subscribed { channels: Vec<String> },
    Unsubscribed { channels: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_type_and_payload() {
        let msg = WsMessage::Pong {
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["payload"]["timestamp"].is_string());
    }

    #[test]
    fn stats_payload_round_trips() {
        let stats = BotStats {
            total_trades: 5,
            winning_trades: 4,
            losing_trades: 1,
            ..Default::default()
        };
        let msg = WsMessage::BotStatsUpdate(BotStatsPayload::new(Uuid::new_v4(), &stats));
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
