use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{MarginMode, PositionSide, PositionStatus};
use crate::error::CoreError;

/// Binance USDⓈ-M futures accept leverage between 1x and 125x.
pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 125;

pub fn validate_leverage(leverage: u32) -> Result<(), CoreError> {
    if !(MIN_LEVERAGE..=MAX_LEVERAGE).contains(&leverage) {
        return Err(CoreError::InvalidInput(
            "leverage".to_string(),
            format!(
                "must be between {} and {}, got {}",
                MIN_LEVERAGE, MAX_LEVERAGE, leverage
            ),
        ));
    }
    Ok(())
}

/// An open (or historical) futures position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bot_id: Option<Uuid>,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub mark_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Margin the position requires at its entry price.
    pub fn margin_required(&self) -> Decimal {
        self.entry_price * self.quantity / Decimal::from(self.leverage)
    }

    /// Signed P&L of the position at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let per_unit = match self.side {
            PositionSide::Short => self.entry_price - price,
            _ => price - self.entry_price,
        };
        per_unit * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn leverage_bounds() {
        assert!(validate_leverage(0).is_err());
        assert!(validate_leverage(1).is_ok());
        assert!(validate_leverage(125).is_ok());
        assert!(validate_leverage(126).is_err());
    }

    fn position(side: PositionSide) -> Position {
        Position {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            bot_id: None,
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: dec!(50000),
            quantity: dec!(0.5),
            leverage: 10,
            margin_mode: MarginMode::Isolated,
            mark_price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            liquidation_price: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn margin_and_pnl() {
        let long = position(PositionSide::Long);
        assert_eq!(long.margin_required(), dec!(2500));
        assert_eq!(long.pnl_at(dec!(51000)), dec!(500));

        let short = position(PositionSide::Short);
        assert_eq!(short.pnl_at(dec!(51000)), dec!(-500));
    }
}
