use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, MarketData, Position};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal_macros::dec;
use serde_json::json;
use ta::Next;
use ta::indicators::SimpleMovingAverage as Sma;

use crate::context::StrategyContext;
use crate::error::StrategyError;
use crate::params::StrategyParams;
use crate::{Signal, SignalKind, Strategy};

/// SMA crossover trend follower working on closed candles.
pub struct TrendFollowing {
    ctx: StrategyContext,
    symbol: String,
    timeframe: &'static str,
    sma_fast: Sma,
    sma_slow: Sma,
    slow_period: usize,
    quantity: Decimal,
    // State: previous SMA values to detect a crossover event. Signals are
    // held back until the slow window has filled once.
    prev_fast: Option<Decimal>,
    prev_slow: Option<Decimal>,
    samples: usize,
    last_close_time: Option<DateTime<Utc>>,
}

impl TrendFollowing {
    pub const NAME: &'static str = "TrendFollowing";

    pub fn new(params: &StrategyParams, ctx: StrategyContext) -> Result<Self, StrategyError> {
        let fast_period = params.usize("fast_period", 20)?;
        let slow_period = params.usize("slow_period", 50)?;
        if fast_period == 0 || fast_period >= slow_period {
            return Err(StrategyError::InvalidParameters(
                "fast_period must be positive and smaller than slow_period".to_string(),
            ));
        }
        let quantity = params.decimal("quantity", params.decimal("base_quantity", dec!(0.001))?)?;
        if quantity <= Decimal::ZERO {
            return Err(StrategyError::InvalidParameters(
                "quantity must be positive".to_string(),
            ));
        }
        let timeframe = match params.string("timeframe", "1h").as_str() {
            "15m" => "15m",
            "30m" => "30m",
            "4h" => "4h",
            "1d" => "1d",
            _ => "1h",
        };

        Ok(Self {
            symbol: params.required_string("symbol")?,
            timeframe,
            // Period validation above is what makes these constructors safe.
            sma_fast: Sma::new(fast_period).expect("validated period"),
            sma_slow: Sma::new(slow_period).expect("validated period"),
            slow_period,
            quantity,
            prev_fast: None,
            prev_slow: None,
            samples: 0,
            last_close_time: None,
            ctx,
        })
    }

    /// Advances both SMAs with a newly closed candle and reports a
    /// crossover, if any.
    fn update(&mut self, close: Decimal) -> Option<SignalKind> {
        // The `ta` crate operates on `f64`; convert from `Decimal` at the
        // boundary.
        let close = close.to_f64()?;
        let fast = Decimal::from_f64(self.sma_fast.next(close))?;
        let slow = Decimal::from_f64(self.sma_slow.next(close))?;

        let kind = match (self.prev_fast, self.prev_slow) {
            (Some(prev_fast), Some(prev_slow)) if self.samples > self.slow_period => {
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

    /// Feeds only candles newer than the last one seen; the engine hands a
    /// trailing window each tick.
    fn absorb(&mut self, candles: &[Kline]) -> Option<SignalKind> {
        let mut signal = None;
        for candle in candles {
            if let Some(last) = self.last_close_time {
                if candle.close_time <= last {
                    continue;
                }
            }
            self.last_close_time = Some(candle.close_time);
            signal = self.update(candle.close);
        }
        signal
    }
}

#[async_trait]
impl Strategy for TrendFollowing {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Rides sustained trends with a fast/slow moving average crossover on \
         closed candles."
    }

    fn required_timeframes(&self) -> Vec<&'static str> {
        vec![self.timeframe]
    }

    async fn on_tick(&mut self, data: &MarketData) -> Result<(), StrategyError> {
        let MarketData::Candles(candles) = data else {
            return Err(StrategyError::MissingMarketData("candles"));
        };

        match self.absorb(candles) {
            Some(SignalKind::OpenLong) => {
                tracing::info!(symbol = %self.symbol, "Trend crossover up, buying");
                self.ctx.buy(&self.symbol, self.quantity, None).await?;
            }
            Some(SignalKind::OpenShort) => {
                tracing::info!(symbol = %self.symbol, "Trend crossover down, selling");
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
        _position: Option<&Position>,
    ) -> Option<Signal> {
        let kind = self.update(candle.close)?;
        Some(Signal {
            kind,
            quantity: Some(self.quantity),
            stop_loss: None,
            take_profit: None,
            metadata: json!({ "strategy": Self::NAME }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::noop_context;
    use chrono::Duration;

    fn params() -> StrategyParams {
        StrategyParams::merged(
            &json!({"fast_period": 2, "slow_period": 3}),
            &json!({"symbol": "ETHUSDT", "quantity": "0.1", "timeframe": "15m"}),
            &serde_json::Value::Null,
        )
    }

    fn candle_at(close: i64, offset_minutes: i64) -> Kline {
        let close = Decimal::from(close);
        let close_time = Utc::now() + Duration::minutes(offset_minutes);
        Kline {
            open_time: close_time - Duration::minutes(15),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            close_time,
            interval: "15m".to_string(),
        }
    }

    #[test]
    fn declares_its_timeframe() {
        let strategy = TrendFollowing::new(&params(), noop_context()).unwrap();
        assert_eq!(strategy.required_timeframes(), vec!["15m"]);
    }

    #[test]
    fn crossover_down_emits_short_signal() {
        let mut strategy = TrendFollowing::new(&params(), noop_context()).unwrap();
        let mut signal = None;
        for (i, close) in [100, 102, 104, 106, 108, 80, 60].into_iter().enumerate() {
            signal = strategy.calculate_signal(&candle_at(close, i as i64 * 15), 0, None);
            if signal.is_some() {
                break;
            }
        }
        assert_eq!(signal.unwrap().kind, SignalKind::OpenShort);
    }

    #[test]
    fn absorb_skips_candles_already_seen() {
        let mut strategy = TrendFollowing::new(&params(), noop_context()).unwrap();
        let window: Vec<Kline> = [100, 102, 104, 106, 108]
            .into_iter()
            .enumerate()
            .map(|(i, close)| candle_at(close, i as i64 * 15))
            .collect();

        strategy.absorb(&window);
        let fed = strategy.samples;
        assert_eq!(fed, window.len());

        // The same window again adds nothing; one fresh candle adds one.
        strategy.absorb(&window);
        assert_eq!(strategy.samples, fed);
        let mut extended = window.clone();
        extended.push(candle_at(80, window.len() as i64 * 15));
        strategy.absorb(&extended);
        assert_eq!(strategy.samples, fed + 1);
    }

    #[tokio::test]
    async fn on_tick_requires_candles() {
        let mut strategy = TrendFollowing::new(&params(), noop_context()).unwrap();
        let ticker = MarketData::Ticker(core_types::Ticker {
            symbol: "ETHUSDT".to_string(),
            price: dec!(100),
            timestamp: Utc::now(),
        });
        let err = strategy.on_tick(&ticker).await.unwrap_err();
        assert!(matches!(err, StrategyError::MissingMarketData(_)));
        assert!(err.is_transient());
    }
}
