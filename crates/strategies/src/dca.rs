use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::MarketData;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::context::StrategyContext;
use crate::error::StrategyError;
use crate::params::StrategyParams;
use crate::Strategy;

/// Dollar-cost averaging: buys a fixed quote amount of the symbol at a fixed
/// interval, regardless of price.
pub struct Dca {
    ctx: StrategyContext,
    symbol: String,
    quote_per_buy: Decimal,
    interval: Duration,
    last_buy: Option<DateTime<Utc>>,
}

impl Dca {
    pub const NAME: &'static str = "Dca";

    pub fn new(params: &StrategyParams, ctx: StrategyContext) -> Result<Self, StrategyError> {
        let quote_per_buy =
            params.decimal("quote_per_buy", params.decimal("quote_quantity", dec!(0))?)?;
        if quote_per_buy <= Decimal::ZERO {
            return Err(StrategyError::InvalidParameters(
                "quote_per_buy must be positive".to_string(),
            ));
        }
        let interval_secs = params.u64("interval_seconds", 3600)?;
        if interval_secs == 0 {
            return Err(StrategyError::InvalidParameters(
                "interval_seconds must be positive".to_string(),
            ));
        }

        Ok(Self {
            symbol: params.required_string("symbol")?,
            quote_per_buy,
            interval: Duration::seconds(interval_secs as i64),
            last_buy: None,
            ctx,
        })
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        match self.last_buy {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }
}

#[async_trait]
impl Strategy for Dca {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Accumulates a position by spending a fixed quote amount at a fixed \
         interval."
    }

    async fn on_tick(&mut self, data: &MarketData) -> Result<(), StrategyError> {
        let now = Utc::now();
        if !self.due(now) {
            return Ok(());
        }
        let price = data
            .last_price()
            .ok_or(StrategyError::MissingMarketData("a price"))?;
        if price <= Decimal::ZERO {
            return Err(StrategyError::MissingMarketData("a positive price"));
        }

        let quantity = (self.quote_per_buy / price).round_dp(6);
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        tracing::info!(symbol = %self.symbol, %quantity, %price, "DCA interval elapsed, buying");
        self.ctx.buy(&self.symbol, quantity, None).await?;
        self.last_buy = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{context_with_recorder, noop_context};
    use serde_json::json;

    fn params(interval: u64) -> StrategyParams {
        StrategyParams::merged(
            &json!({"interval_seconds": interval}),
            &json!({"symbol": "BTCUSDT", "quote_quantity": "100"}),
            &serde_json::Value::Null,
        )
    }

    fn ticker(price: Decimal) -> MarketData {
        MarketData::Ticker(core_types::Ticker {
            symbol: "BTCUSDT".to_string(),
            price,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn requires_positive_quote_amount() {
        let bad = StrategyParams::merged(
            &json!({}),
            &json!({"symbol": "BTCUSDT", "quote_quantity": "0"}),
            &serde_json::Value::Null,
        );
        assert!(Dca::new(&bad, noop_context()).is_err());
    }

    #[tokio::test]
    async fn buys_immediately_then_waits_out_the_interval() {
        let (ctx, orders) = context_with_recorder();
        let mut strategy = Dca::new(&params(3600), ctx).unwrap();

        strategy.on_tick(&ticker(dec!(50000))).await.unwrap();
        assert_eq!(orders.lock().unwrap().len(), 1);
        // 100 USDT at 50k = 0.002.
        assert_eq!(orders.lock().unwrap()[0].quantity, dec!(0.002));

        // Second tick inside the interval does nothing.
        strategy.on_tick(&ticker(dec!(50000))).await.unwrap();
        assert_eq!(orders.lock().unwrap().len(), 1);

        // Pretend the last buy was long ago; the next tick buys again.
        strategy.last_buy = Some(Utc::now() - Duration::seconds(7200));
        strategy.on_tick(&ticker(dec!(50000))).await.unwrap();
        assert_eq!(orders.lock().unwrap().len(), 2);
    }
}
