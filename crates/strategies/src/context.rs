use std::sync::Arc;

use core_types::{MarginMode, Order, OrderSide, PositionSide, TimeInForce, order::NewOrder};
use futures::future::BoxFuture;
use gateway::{ExchangeGateway, OrderAck};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StrategyError;

/// Callback the engine injects to record strategy-initiated orders (and any
/// inline fills the exchange confirmed).
pub type OnOrder = Arc<dyn Fn(Order, OrderAck) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identity and account parameters every order from this bot carries.
#[derive(Debug, Clone)]
pub struct OrderTemplate {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub bot_id: Uuid,
    pub leverage: u32,
    pub margin_mode: MarginMode,
}

/// The strategy's handle on the outside world, injected at construction.
///
/// `buy`/`sell` route through the gateway and then hand the recorded order to
/// the engine's callback; the strategy never touches storage itself.
#[derive(Clone)]
pub struct StrategyContext {
    gateway: Arc<dyn ExchangeGateway>,
    template: OrderTemplate,
    on_order: OnOrder,
}

impl StrategyContext {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        template: OrderTemplate,
        on_order: OnOrder,
    ) -> Self {
        Self {
            gateway,
            template,
            on_order,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    /// Places a buy order: market when `price` is `None`, limit otherwise.
    pub async fn buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order, StrategyError> {
        self.place(symbol, OrderSide::Buy, quantity, price).await
    }

    /// Places a sell order: market when `price` is `None`, limit otherwise.
    pub async fn sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order, StrategyError> {
        self.place(symbol, OrderSide::Sell, quantity, price).await
    }

    async fn place(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order, StrategyError> {
        let params = NewOrder {
            user_id: self.template.user_id,
            connection_id: self.template.connection_id,
            bot_id: Some(self.template.bot_id),
            symbol: symbol.to_string(),
            side,
            quantity,
            position_side: PositionSide::Both,
            reduce_only: false,
            leverage: self.template.leverage,
            margin_mode: self.template.margin_mode,
        };
        let mut order = match price {
            Some(price) => Order::limit(params, price, TimeInForce::Gtc)?,
            None => Order::market(params)?,
        };

        tracing::info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            quantity = %order.quantity,
            price = ?order.price,
            "Placing strategy order"
        );

        match self.gateway.place_order(&order).await {
            Ok(ack) => {
                order.submit(ack.exchange_order_id.clone(), Some(ack.client_order_id.clone()))?;
                if ack.executed_quantity > Decimal::ZERO {
                    if let Some(average_price) = ack.average_price {
                        order.fill(ack.executed_quantity, average_price, Decimal::ZERO, "USDT")?;
                    }
                }
                (self.on_order)(order.clone(), ack).await;
                Ok(order)
            }
            Err(e) => {
                tracing::error!(error = %e, symbol, "Strategy order failed");
                if !e.is_transient() {
                    // The rejection is still recorded so the user sees it.
                    let _ = order.reject(&e.to_string());
                    let ack = OrderAck {
                        exchange_order_id: String::new(),
                        client_order_id: order.client_order_id.clone(),
                        status: order.status,
                        executed_quantity: Decimal::ZERO,
                        average_price: None,
                    };
                    (self.on_order)(order, ack).await;
                }
                Err(StrategyError::Gateway(e))
            }
        }
    }
}
