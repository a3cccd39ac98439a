use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::enums::BotStatus;

/// Per-bot trading configuration. `strategy_settings` is opaque to the core;
/// the strategy implementation interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub symbol: String,
    pub base_quantity: Decimal,
    pub quote_quantity: Decimal,
    pub take_profit_percentage: Decimal,
    pub stop_loss_percentage: Decimal,
    pub strategy_settings: JsonValue,
}

/// Cumulative statistics recomputed from the full trade history on every
/// trade close. Incremental updates drift; the projector always re-aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStats {
    pub total_trades: i64,
    pub total_pnl: Decimal,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub current_win_streak: i64,
    pub current_loss_streak: i64,
    pub max_win_streak: i64,
    pub max_loss_streak: i64,
}

impl BotStats {
    /// Recomputes all stats from realized P&L values in execution-time order.
    /// P&L of exactly zero counts as a loss.
    pub fn from_pnls(pnls: &[Decimal]) -> Self {
        let mut stats = BotStats {
            total_trades: pnls.len() as i64,
            ..Default::default()
        };

        for pnl in pnls {
            stats.total_pnl += *pnl;
            if *pnl > Decimal::ZERO {
                stats.winning_trades += 1;
                stats.current_win_streak += 1;
                stats.current_loss_streak = 0;
                if stats.current_win_streak > stats.max_win_streak {
                    stats.max_win_streak = stats.current_win_streak;
                }
            } else {
                stats.losing_trades += 1;
                stats.current_loss_streak += 1;
                stats.current_win_streak = 0;
                if stats.current_loss_streak > stats.max_loss_streak {
                    stats.max_loss_streak = stats.current_loss_streak;
                }
            }
        }

        stats
    }

    /// Win rate as a percentage (0-100), rounded to two decimals.
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
            * Decimal::from(100))
        .round_dp(2)
    }
}

/// A persistent bot: a strategy + connection + configuration that, while
/// running, is driven by exactly one execution engine in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub strategy_id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub configuration: BotConfiguration,
    pub status: BotStatus,
    pub risk_level: i16,
    pub stats: BotStats,
    pub last_error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub active_order_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stats_recompute_matches_history() {
        let pnls = vec![dec!(50), dec!(40), dec!(-20), dec!(80)];
        let stats = BotStats::from_pnls(&pnls);
        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.total_pnl, dec!(150));
        assert_eq!(stats.winning_trades, 3);
        assert_eq!(stats.losing_trades, 1);
        // The loss resets the opening two-win run; one win follows it.
        assert_eq!(stats.current_win_streak, 1);
        assert_eq!(stats.current_loss_streak, 0);
        assert_eq!(stats.max_win_streak, 2);
        assert_eq!(stats.max_loss_streak, 1);

        // One more winning trade extends the live streak and the totals.
        let pnls = vec![dec!(50), dec!(40), dec!(-20), dec!(80), dec!(30)];
        let stats = BotStats::from_pnls(&pnls);
        assert_eq!(stats.total_trades, 5);
        assert_eq!(stats.total_pnl, dec!(180));
        assert_eq!(stats.winning_trades, 4);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.current_win_streak, 2);
        assert_eq!(stats.current_loss_streak, 0);
        assert_eq!(stats.max_win_streak, 2);
        assert_eq!(stats.max_loss_streak, 1);
    }

    #[test]
    fn zero_pnl_counts_as_loss() {
        let stats = BotStats::from_pnls(&[dec!(10), dec!(0)]);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.current_loss_streak, 1);
        assert_eq!(stats.current_win_streak, 0);
    }

    #[test]
    fn at_most_one_live_streak() {
        for pnls in [
            vec![dec!(1), dec!(2), dec!(3)],
            vec![dec!(-1), dec!(-2)],
            vec![dec!(1), dec!(-1), dec!(1)],
            vec![],
        ] {
            let stats = BotStats::from_pnls(&pnls);
            assert!(
                stats.current_win_streak == 0 || stats.current_loss_streak == 0,
                "pnls {:?}",
                pnls
            );
            assert_eq!(
                stats.winning_trades + stats.losing_trades,
                stats.total_trades
            );
        }
    }

    #[test]
    fn win_rate_is_percentage() {
        let stats = BotStats::from_pnls(&[dec!(1), dec!(1), dec!(-1)]);
        assert_eq!(stats.win_rate(), dec!(66.67));
        assert_eq!(BotStats::default().win_rate(), Decimal::ZERO);
    }
}
