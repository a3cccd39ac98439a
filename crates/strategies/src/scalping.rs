use async_trait::async_trait;
use core_types::{Kline, MarketData, Position};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal_macros::dec;
use serde_json::json;
use ta::Next;
use ta::indicators::ExponentialMovingAverage as Ema;

use crate::context::StrategyContext;
use crate::error::StrategyError;
use crate::params::StrategyParams;
use crate::{Signal, SignalKind, Strategy};

/// High-frequency EMA crossover scalper.
///
/// Feeds each tick price through a fast and a slow EMA; a fast-over-slow
/// cross opens long, the opposite cross opens short. Take-profit and
/// stop-loss percentages ride along as signal metadata for the execution
/// layer.
pub struct Scalping {
    ctx: StrategyContext,
    symbol: String,
    ema_fast: Ema,
    ema_slow: Ema,
    quantity: Decimal,
    take_profit_pct: Decimal,
    stop_loss_pct: Decimal,
    // State: previous EMA values to detect a crossover event, plus a sample
    // counter gating signals until the indicators are warmed up.
    prev_fast: Option<Decimal>,
    prev_slow: Option<Decimal>,
    samples: usize,
    min_history: usize,
}

impl Scalping {
    pub const NAME: &'static str = "Scalping";

    pub fn new(params: &StrategyParams, ctx: StrategyContext) -> Result<Self, StrategyError> {
        let ema_fast = params.usize("ema_fast", 5)?;
        let ema_slow = params.usize("ema_slow", 13)?;
        if ema_fast == 0 || ema_slow == 0 || ema_fast >= ema_slow {
            return Err(StrategyError::InvalidParameters(
                "ema_fast must be positive and smaller than ema_slow".to_string(),
            ));
        }
        let quantity = params.decimal("quantity", params.decimal("base_quantity", dec!(0.001))?)?;
        if quantity <= Decimal::ZERO {
            return Err(StrategyError::InvalidParameters(
                "quantity must be positive".to_string(),
            ));
        }

        Ok(Self {
            symbol: params.required_string("symbol")?,
            // Period validation above is what makes these constructors safe.
            ema_fast: Ema::new(ema_fast).expect("validated period"),
            ema_slow: Ema::new(ema_slow).expect("validated period"),
            quantity,
            take_profit_pct: params.decimal("take_profit_percentage", dec!(0.5))?,
            stop_loss_pct: params.decimal("stop_loss_percentage", dec!(0.2))?,
            prev_fast: None,
            prev_slow: None,
            samples: 0,
            min_history: ema_slow + 5,
            ctx,
        })
    }

    /// Advances both EMAs with the new price and reports a crossover, if any.
    fn update(&mut self, price: Decimal) -> Option<SignalKind> {
        // The `ta` crate operates on `f64`; convert from `Decimal` at the
        // boundary.
        let close = price.to_f64()?;
        let fast = Decimal::from_f64(self.ema_fast.next(close))?;
        let slow = Decimal::from_f64(self.ema_slow.next(close))?;

        let kind = match (self.prev_fast, self.prev_slow) {
            (Some(prev_fast), Some(prev_slow)) if self.samples >= self.min_history => {
                if prev_fast <= prev_slow && fast > slow {
                    Some(SignalKind::OpenLong)
                } else if prev_fast >= prev_slow && fast < slow {
                    Some(SignalKind::OpenShort)
                } else {
                    None
                }
            }
            _ => None,
        };

        self.prev_fast = Some(fast);
        self.prev_slow = Some(slow);
        self.samples += 1;
        kind
    }
}

#[async_trait]
impl Strategy for Scalping {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Executes multiple high-speed trades to capture small price changes \
         using tight moving average crossovers."
    }

    async fn on_tick(&mut self, data: &MarketData) -> Result<(), StrategyError> {
        let price = data
            .last_price()
            .ok_or(StrategyError::MissingMarketData("a price"))?;

        match self.update(price) {
            Some(SignalKind::OpenLong) => {
                tracing::info!(symbol = %self.symbol, %price, "Scalping crossover up, buying");
                self.ctx.buy(&self.symbol, self.quantity, None).await?;
            }
            Some(SignalKind::OpenShort) => {
                tracing::info!(symbol = %self.symbol, %price, "Scalping crossover down, selling");
                self.ctx.sell(&self.symbol, self.quantity, None).await?;
            }
            _ => {}
        }
        Ok(())
    }

    fn calculate_signal(
        &mut self,
        candle: &Kline,
        _index: usize,
        position: Option<&Position>,
    ) -> Option<Signal> {
        let kind = self.update(candle.close)?;

        // Scalping flips rather than stacking: an opposite signal while a
        // position is open becomes a flip.
        let kind = match (kind, position) {
            (SignalKind::OpenShort, Some(p)) if p.side == core_types::PositionSide::Long => {
                SignalKind::FlipShort
            }
            (SignalKind::OpenLong, Some(p)) if p.side == core_types::PositionSide::Short => {
                SignalKind::FlipLong
            }
            (kind, _) => kind,
        };

        Some(Signal {
            kind,
            quantity: Some(self.quantity),
            stop_loss: Some(self.stop_loss_pct),
            take_profit: Some(self.take_profit_pct),
            metadata: json!({ "strategy": Self::NAME }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::noop_context;
    use chrono::Utc;
    use uuid::Uuid;

    fn params() -> StrategyParams {
        StrategyParams::merged(
            &json!({"ema_fast": 2, "ema_slow": 4}),
            &json!({"symbol": "BTCUSDT", "quantity": "0.01"}),
            &serde_json::Value::Null,
        )
    }

    fn candle(close: Decimal) -> Kline {
        Kline {
            open_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            close_time: Utc::now(),
            interval: "1m".to_string(),
        }
    }

    #[test]
    fn rejects_inverted_ema_periods() {
        let params = StrategyParams::merged(
            &json!({"ema_fast": 10, "ema_slow": 5}),
            &json!({"symbol": "BTCUSDT"}),
            &serde_json::Value::Null,
        );
        assert!(Scalping::new(&params, noop_context()).is_err());
    }

    #[test]
    fn crossover_up_emits_long_signal() {
        let mut strategy = Scalping::new(&params(), noop_context()).unwrap();
        // Downtrend long enough to warm up, then a sharp reversal.
        let mut signal = None;
        for price in [100, 98, 96, 94, 92, 90, 88, 86, 84, 110, 130] {
            signal = strategy.calculate_signal(&candle(Decimal::from(price)), 0, None);
            if signal.is_some() {
                break;
            }
        }
        let signal = signal.expect("expected a crossover signal");
        assert_eq!(signal.kind, SignalKind::OpenLong);
        assert_eq!(signal.quantity, Some(dec!(0.01)));
    }

    #[test]
    fn opposite_signal_with_open_position_flips() {
        let mut strategy = Scalping::new(&params(), noop_context()).unwrap();
        let position = Position {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            bot_id: None,
            symbol: "BTCUSDT".to_string(),
            side: core_types::PositionSide::Short,
            entry_price: dec!(100),
            quantity: dec!(0.01),
            leverage: 1,
            margin_mode: core_types::MarginMode::Isolated,
            mark_price: dec!(100),
            stop_loss: None,
            take_profit: None,
            liquidation_price: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            status: core_types::PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        };
        let mut signal = None;
        for price in [100, 98, 96, 94, 92, 90, 88, 86, 84, 110, 130] {
            signal = strategy.calculate_signal(&candle(Decimal::from(price)), 0, Some(&position));
            if signal.is_some() {
                break;
            }
        }
        assert_eq!(signal.unwrap().kind, SignalKind::FlipLong);
    }

    #[test]
    fn no_signal_during_warm_up() {
        let mut strategy = Scalping::new(&params(), noop_context()).unwrap();
        // min_history is ema_slow + 5 = 9; an early reversal stays silent.
        for price in [100, 90, 110, 120] {
            assert!(
                strategy
                    .calculate_signal(&candle(Decimal::from(price)), 0, None)
                    .is_none()
            );
        }
    }
}
