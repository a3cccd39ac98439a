//! The per-user portfolio aggregate.
//!
//! Manages balances (free + locked) and open positions, enforcing the margin
//! invariants: opening a position moves its required margin from free to
//! locked, closing restores the margin plus/minus realized P&L, and a mutation
//! that would break an invariant is refused whole. State changes emit domain
//! events that callers drain and publish after persisting.

pub mod error;

pub use error::PortfolioError;

use chrono::{DateTime, Utc};
use core_types::{MarginMode, Position, PositionSide, PositionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// All margin is posted in the quote asset.
pub const QUOTE_ASSET: &str = "USDT";

/// One asset's balance, split into the free part and the part locked as
/// position margin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortfolioEvent {
    BalanceUpdated {
        asset: String,
        free: Decimal,
        locked: Decimal,
    },
    PositionOpened {
        position_id: Uuid,
        bot_id: Option<Uuid>,
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
        margin_locked: Decimal,
    },
    PositionClosed {
        position_id: Uuid,
        bot_id: Option<Uuid>,
        symbol: String,
        realized_pnl: Decimal,
        close_price: Decimal,
        close_reason: String,
    },
    Liquidation {
        position_id: Uuid,
        bot_id: Option<Uuid>,
        symbol: String,
        liquidation_price: Decimal,
    },
}

/// Parameters for opening a position.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub bot_id: Option<Uuid>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
}

pub struct Portfolio {
    user_id: Uuid,
    balances: HashMap<String, AssetBalance>,
    /// At most one open position per symbol.
    positions: HashMap<String, Position>,
    events: Vec<PortfolioEvent>,
}

impl Portfolio {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            balances: HashMap::new(),
            positions: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Drains the uncommitted domain events.
    pub fn take_events(&mut self) -> Vec<PortfolioEvent> {
        std::mem::take(&mut self.events)
    }

    /// Overwrites an asset balance from an authoritative account snapshot.
    pub fn update_balance(&mut self, asset: &str, free: Decimal, locked: Decimal) {
        let asset = asset.to_uppercase();
        self.balances
            .insert(asset.clone(), AssetBalance { free, locked });
        self.events.push(PortfolioEvent::BalanceUpdated {
            asset,
            free,
            locked,
        });
    }

    /// Opens a position, locking its required margin.
    ///
    /// Refused whole when the free quote balance cannot cover the margin or a
    /// position already exists for the symbol.
    pub fn open_position(&mut self, open: OpenPosition) -> Result<Uuid, PortfolioError> {
        if open.quantity <= Decimal::ZERO || open.entry_price <= Decimal::ZERO {
            return Err(PortfolioError::InvalidPosition(
                "quantity and entry price must be positive".to_string(),
            ));
        }
        core_types::position::validate_leverage(open.leverage)
            .map_err(|e| PortfolioError::InvalidPosition(e.to_string()))?;
        if self.positions.contains_key(&open.symbol) {
            return Err(PortfolioError::PositionExists(open.symbol));
        }

        let margin_required =
            open.entry_price * open.quantity / Decimal::from(open.leverage);
        let balance = self.balance(QUOTE_ASSET);
        if margin_required > balance.free {
            return Err(PortfolioError::InsufficientBalance {
                required: margin_required,
                available: balance.free,
            });
        }

        self.balances.insert(
            QUOTE_ASSET.to_string(),
            AssetBalance {
                free: balance.free - margin_required,
                locked: balance.locked + margin_required,
            },
        );

        let position_id = Uuid::new_v4();
        let position = Position {
            id: position_id,
            user_id: self.user_id,
            bot_id: open.bot_id,
            symbol: open.symbol.clone(),
            side: open.side,
            entry_price: open.entry_price,
            quantity: open.quantity,
            leverage: open.leverage,
            margin_mode: open.margin_mode,
            mark_price: open.entry_price,
            stop_loss: open.stop_loss,
            take_profit: open.take_profit,
            liquidation_price: open.liquidation_price,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        };
        self.events.push(PortfolioEvent::PositionOpened {
            position_id,
            bot_id: open.bot_id,
            symbol: open.symbol.clone(),
            side: open.side,
            quantity: open.quantity,
            entry_price: open.entry_price,
            margin_locked: margin_required,
        });
        self.positions.insert(open.symbol, position);

        Ok(position_id)
    }

    /// Closes the position on `symbol` at `close_price`, releasing its margin
    /// and settling realized P&L into the free balance.
    pub fn close_position(
        &mut self,
        symbol: &str,
        close_price: Decimal,
        close_reason: &str,
    ) -> Result<Decimal, PortfolioError> {
        let position = self
            .positions
            .remove(symbol)
            .ok_or_else(|| PortfolioError::UnknownPosition(symbol.to_string()))?;

        let realized_pnl = position.pnl_at(close_price);
        let margin = position.margin_required();

        let balance = self.balance(QUOTE_ASSET);
        self.balances.insert(
            QUOTE_ASSET.to_string(),
            AssetBalance {
                free: balance.free + margin + realized_pnl,
                locked: balance.locked - margin,
            },
        );

        self.events.push(PortfolioEvent::PositionClosed {
            position_id: position.id,
            bot_id: position.bot_id,
            symbol: symbol.to_string(),
            realized_pnl,
            close_price,
            close_reason: close_reason.to_string(),
        });

        Ok(realized_pnl)
    }

    /// Applies a mark-price update: recomputes unrealized P&L and, if the
    /// liquidation price is crossed, closes at the liquidation price.
    pub fn update_mark_price(
        &mut self,
        symbol: &str,
        mark_price: Decimal,
    ) -> Result<(), PortfolioError> {
        let Some(position) = self.positions.get_mut(symbol) else {
            return Ok(());
        };
        position.mark_price = mark_price;
        position.unrealized_pnl = position.pnl_at(mark_price);

        if let Some(liquidation_price) = position.liquidation_price {
            let crossed = match position.side {
                PositionSide::Short => mark_price >= liquidation_price,
                _ => mark_price <= liquidation_price,
            };
            if crossed {
                let (position_id, bot_id) = (position.id, position.bot_id);
                tracing::warn!(symbol, %liquidation_price, "Position liquidated");
                self.events.push(PortfolioEvent::Liquidation {
                    position_id,
                    bot_id,
                    symbol: symbol.to_string(),
                    liquidation_price,
                });
                self.close_position(symbol, liquidation_price, "liquidation")?;
            }
        }
        Ok(())
    }

    /// Read-only stop-loss trigger check against the mark price. Executing
    /// the close is the caller's duty.
    pub fn stop_loss_triggered(&self, symbol: &str, mark_price: Decimal) -> bool {
        self.positions
            .get(symbol)
            .and_then(|p| p.stop_loss.map(|sl| (p.side, sl)))
            .is_some_and(|(side, stop_loss)| match side {
                PositionSide::Short => mark_price >= stop_loss,
                _ => mark_price <= stop_loss,
            })
    }

    /// Read-only take-profit trigger check against the mark price.
    pub fn take_profit_triggered(&self, symbol: &str, mark_price: Decimal) -> bool {
        self.positions
            .get(symbol)
            .and_then(|p| p.take_profit.map(|tp| (p.side, tp)))
            .is_some_and(|(side, take_profit)| match side {
                PositionSide::Short => mark_price <= take_profit,
                _ => mark_price >= take_profit,
            })
    }

    /// Total equity in the quote asset: balances plus unrealized P&L.
    pub fn total_equity(&self) -> Decimal {
        let balance: Decimal = self.balances.values().map(AssetBalance::total).sum();
        let unrealized: Decimal = self.positions.values().map(|p| p.unrealized_pnl).sum();
        balance + unrealized
    }

    /// Margin currently required by all open positions. The locked quote
    /// balance is always at least this.
    pub fn margin_in_use(&self) -> Decimal {
        self.positions.values().map(Position::margin_required).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded_portfolio(free: Decimal) -> Portfolio {
        let mut portfolio = Portfolio::new(Uuid::new_v4());
        portfolio.update_balance(QUOTE_ASSET, free, Decimal::ZERO);
        portfolio.take_events();
        portfolio
    }

    fn open(symbol: &str, quantity: Decimal, price: Decimal, leverage: u32) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            quantity,
            entry_price: price,
            leverage,
            margin_mode: MarginMode::Isolated,
            bot_id: Some(Uuid::new_v4()),
            stop_loss: None,
            take_profit: None,
            liquidation_price: None,
        }
    }

    #[test]
    fn opening_moves_margin_from_free_to_locked() {
        let mut portfolio = funded_portfolio(dec!(10000));
        // 0.5 BTC at 50k with 10x leverage needs 2500 margin.
        portfolio
            .open_position(open("BTCUSDT", dec!(0.5), dec!(50000), 10))
            .unwrap();

        let balance = portfolio.balance(QUOTE_ASSET);
        assert_eq!(balance.free, dec!(7500));
        assert_eq!(balance.locked, dec!(2500));
        assert_eq!(balance.total(), dec!(10000));
        assert!(balance.locked >= portfolio.margin_in_use());

        let events = portfolio.take_events();
        assert!(matches!(
            events.as_slice(),
            [PortfolioEvent::PositionOpened { margin_locked, .. }] if *margin_locked == dec!(2500)
        ));
    }

    #[test]
    fn margin_one_over_free_is_refused_without_state_change() {
        let mut portfolio = funded_portfolio(dec!(2500));
        // Margin of 2501 against 2500 free.
        let err = portfolio
            .open_position(open("BTCUSDT", dec!(0.5002), dec!(50010), 10))
            .unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientBalance { .. }));

        let balance = portfolio.balance(QUOTE_ASSET);
        assert_eq!(balance.free, dec!(2500));
        assert_eq!(balance.locked, Decimal::ZERO);
        assert_eq!(portfolio.positions().count(), 0);
        assert!(portfolio.take_events().is_empty());
    }

    #[test]
    fn one_position_per_symbol() {
        let mut portfolio = funded_portfolio(dec!(10000));
        portfolio
            .open_position(open("BTCUSDT", dec!(0.1), dec!(50000), 10))
            .unwrap();
        let err = portfolio
            .open_position(open("BTCUSDT", dec!(0.1), dec!(50000), 10))
            .unwrap_err();
        assert!(matches!(err, PortfolioError::PositionExists(_)));
    }

    #[test]
    fn closing_restores_margin_plus_pnl() {
        let mut portfolio = funded_portfolio(dec!(10000));
        portfolio
            .open_position(open("BTCUSDT", dec!(0.5), dec!(50000), 10))
            .unwrap();
        portfolio.take_events();

        // +1000 price => +500 pnl on 0.5.
        let pnl = portfolio
            .close_position("BTCUSDT", dec!(51000), "manual")
            .unwrap();
        assert_eq!(pnl, dec!(500));

        let balance = portfolio.balance(QUOTE_ASSET);
        assert_eq!(balance.free, dec!(10500));
        assert_eq!(balance.locked, Decimal::ZERO);

        let events = portfolio.take_events();
        assert!(matches!(
            events.as_slice(),
            [PortfolioEvent::PositionClosed { realized_pnl, bot_id: Some(_), .. }]
                if *realized_pnl == dec!(500)
        ));
    }

    #[test]
    fn crossing_liquidation_price_closes_at_it() {
        let mut portfolio = funded_portfolio(dec!(10000));
        let mut open = open("BTCUSDT", dec!(0.5), dec!(50000), 10);
        open.liquidation_price = Some(dec!(45500));
        portfolio.open_position(open).unwrap();
        portfolio.take_events();

        portfolio.update_mark_price("BTCUSDT", dec!(45000)).unwrap();
        assert!(portfolio.position("BTCUSDT").is_none());

        let events = portfolio.take_events();
        assert!(matches!(events[0], PortfolioEvent::Liquidation { .. }));
        assert!(matches!(
            &events[1],
            PortfolioEvent::PositionClosed { close_reason, close_price, .. }
                if close_reason == "liquidation" && *close_price == dec!(45500)
        ));
    }

    #[test]
    fn stop_and_take_profit_predicates_are_read_only() {
        let mut portfolio = funded_portfolio(dec!(10000));
        let mut params = open("BTCUSDT", dec!(0.5), dec!(50000), 10);
        params.stop_loss = Some(dec!(49000));
        params.take_profit = Some(dec!(52000));
        portfolio.open_position(params).unwrap();

        assert!(!portfolio.stop_loss_triggered("BTCUSDT", dec!(49500)));
        assert!(portfolio.stop_loss_triggered("BTCUSDT", dec!(48900)));
        assert!(!portfolio.take_profit_triggered("BTCUSDT", dec!(51000)));
        assert!(portfolio.take_profit_triggered("BTCUSDT", dec!(52000)));
        assert!(portfolio.position("BTCUSDT").is_some());
    }

    #[test]
    fn unrealized_pnl_moves_with_mark_price() {
        let mut portfolio = funded_portfolio(dec!(10000));
        portfolio
            .open_position(open("BTCUSDT", dec!(0.5), dec!(50000), 10))
            .unwrap();
        portfolio.update_mark_price("BTCUSDT", dec!(49000)).unwrap();
        assert_eq!(
            portfolio.position("BTCUSDT").unwrap().unrealized_pnl,
            dec!(-500)
        );
        assert_eq!(portfolio.total_equity(), dec!(9500));
    }
}
