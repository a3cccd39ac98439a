use std::collections::HashMap;

use crate::context::StrategyContext;
use crate::dca::Dca;
use crate::error::StrategyError;
use crate::params::StrategyParams;
use crate::scalping::Scalping;
use crate::trend_following::TrendFollowing;
use crate::Strategy;

type StrategyCtor =
    fn(&StrategyParams, StrategyContext) -> Result<Box<dyn Strategy>, StrategyError>;

/// Name-keyed registry of strategy constructors.
///
/// Built-ins register at startup; the bot manager resolves a bot's strategy
/// by the display name stored on its strategy row. User-supplied strategies
/// run out of process and are not constructed here.
#[derive(Default)]
pub struct StrategyRegistry {
    ctors: HashMap<String, StrategyCtor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in strategy registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Scalping::NAME, |params, ctx| {
            Ok(Box::new(Scalping::new(params, ctx)?))
        });
        registry.register(TrendFollowing::NAME, |params, ctx| {
            Ok(Box::new(TrendFollowing::new(params, ctx)?))
        });
        registry.register(Dca::NAME, |params, ctx| Ok(Box::new(Dca::new(params, ctx)?)));
        registry
    }

    pub fn register(&mut self, name: &str, ctor: StrategyCtor) {
        self.ctors.insert(name.to_string(), ctor);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    /// Instantiates the named strategy with merged parameters and the
    /// engine-provided context.
    pub fn create(
        &self,
        name: &str,
        params: &StrategyParams,
        ctx: StrategyContext,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))?;
        ctor(params, ctx)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::OrderTemplate;
    use async_trait::async_trait;
    use core_types::{Kline, MarginMode, Order, OrderStatus, Ticker};
    use gateway::{
        AccountSnapshot, ExchangeGateway, GatewayError, MarketEvent, OrderAck, OrderStatusReport,
        UserEvent,
    };
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Acknowledges every order and records nothing else.
    pub(crate) struct FakeGateway;

    #[async_trait]
    impl ExchangeGateway for FakeGateway {
        async fn place_order(&self, order: &Order) -> Result<OrderAck, GatewayError> {
            Ok(OrderAck {
                exchange_order_id: format!("FAKE-{}", order.client_order_id),
                client_order_id: order.client_order_id.clone(),
                status: OrderStatus::New,
                executed_quantity: Decimal::ZERO,
                average_price: None,
            })
        }

        async fn cancel_order(
            &self,
            _symbol: &str,
            exchange_order_id: &str,
        ) -> Result<OrderStatusReport, GatewayError> {
            Err(GatewayError::NotFound(exchange_order_id.to_string()))
        }

        async fn get_order(
            &self,
            _symbol: &str,
            exchange_order_id: &str,
        ) -> Result<OrderStatusReport, GatewayError> {
            Err(GatewayError::NotFound(exchange_order_id.to_string()))
        }

        async fn list_open_orders(
            &self,
            _symbol: Option<&str>,
        ) -> Result<Vec<OrderStatusReport>, GatewayError> {
            Ok(Vec::new())
        }

        async fn get_account(&self) -> Result<AccountSnapshot, GatewayError> {
            Ok(AccountSnapshot {
                balances: Vec::new(),
                can_trade: true,
            })
        }

        async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
            Ok(Ticker {
                symbol: symbol.to_string(),
                price: Decimal::ONE,
                timestamp: chrono::Utc::now(),
            })
        }

        async fn get_recent_candles(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u16,
        ) -> Result<Vec<Kline>, GatewayError> {
            Ok(Vec::new())
        }

        async fn test_connectivity(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn stream_user_events(&self) -> Result<mpsc::Receiver<UserEvent>, GatewayError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn stream_market_events(
            &self,
            _symbols: &[String],
            _interval: &str,
        ) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn close(&self) {}
    }

    fn template() -> OrderTemplate {
        OrderTemplate {
            user_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            leverage: 5,
            margin_mode: MarginMode::Isolated,
        }
    }

    pub(crate) fn noop_context() -> StrategyContext {
        StrategyContext::new(
            Arc::new(FakeGateway),
            template(),
            Arc::new(|_, _| Box::pin(async {})),
        )
    }

    /// A context whose callback records every order it sees.
    pub(crate) fn context_with_recorder() -> (StrategyContext, Arc<Mutex<Vec<Order>>>) {
        let orders: Arc<Mutex<Vec<Order>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = orders.clone();
        let ctx = StrategyContext::new(
            Arc::new(FakeGateway),
            template(),
            Arc::new(move |order, _ack| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push(order);
                })
            }),
        );
        (ctx, orders)
    }

    #[test]
    fn builtins_resolve_by_name() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.contains("Scalping"));
        assert!(registry.contains("TrendFollowing"));
        assert!(registry.contains("Dca"));
        assert_eq!(registry.names().len(), 3);

        let params = StrategyParams::merged(
            &json!({}),
            &json!({"symbol": "BTCUSDT", "quantity": "0.01"}),
            &serde_json::Value::Null,
        );
        let strategy = registry.create("Scalping", &params, noop_context()).unwrap();
        assert_eq!(strategy.name(), "Scalping");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = StrategyRegistry::with_builtins();
        let params = StrategyParams::default();
        let result = registry.create("Arbitrage", &params, noop_context());
        match result {
            Err(err) => assert!(matches!(err, StrategyError::UnknownStrategy(_))),
            Ok(_) => panic!("expected unknown strategy error"),
        }
    }

    #[tokio::test]
    async fn context_submits_and_reports_orders() {
        let (ctx, orders) = context_with_recorder();
        let order = ctx
            .buy("BTCUSDT", Decimal::new(1, 2), None)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert!(order.exchange_order_id.as_deref().unwrap().starts_with("FAKE-"));

        let recorded = orders.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].id, order.id);
    }
}
