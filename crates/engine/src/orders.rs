use std::sync::Arc;

use core_types::{Order, Trade};
use database::{
    Connection, ConnectionRepository, OrderRepository, RecordOutcome, TradeRepository,
};
use events::{BotStatsPayload, FanoutBus, WsMessage, channels};
use gateway::{ExchangeGateway, FillEvent, UserEvent};
use keystore::Cipher;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::EngineError;

/// Order use-cases: submission, cancellation, cancel-and-replace, and the
/// fill-to-trade path that keeps bot stats live.
pub struct OrderService {
    orders: OrderRepository,
    trades: TradeRepository,
    connections: ConnectionRepository,
    cipher: Cipher,
    bus: Arc<FanoutBus>,
}

impl OrderService {
    pub fn new(
        orders: OrderRepository,
        trades: TradeRepository,
        connections: ConnectionRepository,
        cipher: Cipher,
        bus: Arc<FanoutBus>,
    ) -> Self {
        Self {
            orders,
            trades,
            connections,
            cipher,
            bus,
        }
    }

    /// Builds a gateway for the order's connection, selecting the key pair by
    /// the connection's testnet flag.
    async fn gateway_for(
        &self,
        connection_id: Uuid,
    ) -> Result<(Connection, Arc<dyn ExchangeGateway>), EngineError> {
        let connection = self
            .connections
            .get(connection_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Exchange connection".to_string()))?;
        let credentials = self
            .cipher
            .reveal(&connection.secrets, connection.is_testnet)?;
        let gateway = gateway::connect(
            connection.exchange_kind,
            &credentials.api_key,
            &credentials.api_secret,
            connection.is_testnet,
        )?;
        Ok((connection, gateway))
    }

    fn publish_order(&self, order: &Order) {
        self.bus.publish_to_user(
            order.user_id,
            channels::ORDERS,
            WsMessage::OrderUpdate(order.clone()),
        );
    }

    /// Persists the order, submits it to the exchange, and persists the
    /// resulting transition. At-least-once: the client order id rides along
    /// as the upstream idempotency key.
    pub async fn create(&self, mut order: Order) -> Result<Order, EngineError> {
        let (connection, gateway) = self.gateway_for(order.connection_id).await?;
        if connection.user_id != order.user_id {
            return Err(EngineError::NotFound("Exchange connection".to_string()));
        }
        if !connection.can_place_orders() {
            return Err(EngineError::Validation(
                "Connection cannot place orders (not connected, read-only, or missing a trade permission)"
                    .to_string(),
            ));
        }

        self.orders.create(&order).await?;

        match gateway.place_order(&order).await {
            Ok(ack) => {
                order.submit(ack.exchange_order_id, Some(ack.client_order_id))?;
                if ack.executed_quantity > Decimal::ZERO {
                    if let Some(price) = ack.average_price {
                        order.fill(ack.executed_quantity, price, Decimal::ZERO, "USDT")?;
                    }
                }
                self.orders.update(&order).await?;
                self.publish_order(&order);
                self.record_ack_fill(&order).await?;
                Ok(order)
            }
            Err(e) => {
                if !e.is_transient() {
                    order.reject(&e.to_string())?;
                    self.orders.update(&order).await?;
                    self.publish_order(&order);
                }
                Err(EngineError::Gateway(e))
            }
        }
    }

    /// Records a strategy-initiated order that already went through the
    /// gateway (the engine's on-order callback path).
    pub async fn record_strategy_order(&self, order: &Order) -> Result<(), EngineError> {
        self.orders.create(order).await?;
        self.publish_order(order);
        self.record_ack_fill(order).await?;
        Ok(())
    }

    /// When the submission ack already confirmed execution (market orders),
    /// record the inline trade. Keyed by the exchange order id, so replays
    /// and later per-trade events converge instead of double counting.
    async fn record_ack_fill(&self, order: &Order) -> Result<(), EngineError> {
        let Some(exchange_order_id) = order.exchange_order_id.as_deref() else {
            return Ok(());
        };
        if order.execution.executed_quantity <= Decimal::ZERO {
            return Ok(());
        }
        let Some(price) = order.execution.average_price else {
            return Ok(());
        };

        let trade = Trade {
            id: Uuid::new_v4(),
            order_id: order.id,
            bot_id: order.bot_id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            quantity: order.execution.executed_quantity,
            commission: order.execution.commission,
            commission_asset: order.execution.commission_asset.clone(),
            realized_pnl: Decimal::ZERO,
            exchange_trade_id: format!("ack:{}", exchange_order_id),
            executed_at: order.updated_at,
        };
        self.store_trade(trade).await
    }

    async fn store_trade(&self, trade: Trade) -> Result<(), EngineError> {
        let user_id = trade.user_id;
        let bot_id = trade.bot_id;
        match self.trades.record(&trade).await? {
            RecordOutcome::Inserted(stats) => {
                let channel = channels::trades(&trade.symbol);
                self.bus
                    .publish_to_user(user_id, &channel, WsMessage::Trade(trade));
                if let (Some(bot_id), Some(stats)) = (bot_id, stats) {
                    self.bus.publish_to_user(
                        user_id,
                        channels::BOTS,
                        WsMessage::BotStatsUpdate(BotStatsPayload::new(bot_id, &stats)),
                    );
                }
            }
            RecordOutcome::Duplicate => {}
        }
        Ok(())
    }

    /// Cancels an active order on the exchange and locally.
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, EngineError> {
        let mut order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| EngineError::NotFound("Order".to_string()))?;

        if !order.is_active() {
            return Err(EngineError::Order(core_types::CoreError::InvalidTransition(
                format!("cannot cancel order in {} status", order.status.as_str()),
            )));
        }

        if let Some(exchange_order_id) = order.exchange_order_id.clone() {
            let (_, gateway) = self.gateway_for(order.connection_id).await?;
            match gateway.cancel_order(&order.symbol, &exchange_order_id).await {
                Ok(_) => {}
                // Already gone upstream; local state is still worth fixing.
                Err(gateway::GatewayError::NotFound(_)) => {}
                Err(e) => return Err(EngineError::Gateway(e)),
            }
        }

        order.cancel(Some("Cancelled by user"))?;
        self.orders.update(&order).await?;
        self.publish_order(&order);
        Ok(order)
    }

    /// Modify as cancel-and-replace: the exchange does not support in-place
    /// modification. The user is never left with both legs active.
    pub async fn modify(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
        new_stop_price: Option<Decimal>,
    ) -> Result<Order, EngineError> {
        if new_quantity.is_none() && new_price.is_none() && new_stop_price.is_none() {
            return Err(EngineError::Validation("No modifications specified".to_string()));
        }

        let mut original = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| EngineError::NotFound("Order".to_string()))?;

        if !original.is_active() {
            return Err(EngineError::Order(core_types::CoreError::InvalidTransition(
                format!(
                    "cannot modify order in {} status; only active orders can be modified",
                    original.status.as_str()
                ),
            )));
        }

        let (_, gateway) = self.gateway_for(original.connection_id).await?;

        // Step 1: take the original off the exchange. A failure here usually
        // means it is already cancelled or filled; proceed either way.
        if let Some(exchange_order_id) = original.exchange_order_id.clone() {
            if let Err(e) = gateway.cancel_order(&original.symbol, &exchange_order_id).await {
                tracing::warn!(order_id = %original.id, error = %e, "Cancel of original failed, continuing");
            }
        }
        original.cancel(Some("Replaced by modified order"))?;
        self.orders.update(&original).await?;
        self.publish_order(&original);

        // Step 2: create the replacement leg.
        let mut replacement =
            original.clone_for_replacement(new_quantity, new_price, new_stop_price)?;
        self.orders.create(&replacement).await?;

        // Step 3: submit it.
        match gateway.place_order(&replacement).await {
            Ok(ack) => {
                replacement.submit(ack.exchange_order_id, Some(ack.client_order_id))?;
                self.orders.update(&replacement).await?;
                self.publish_order(&replacement);
                tracing::info!(
                    original = %original.id,
                    replacement = %replacement.id,
                    "Order modified via cancel-and-replace"
                );
                Ok(replacement)
            }
            Err(e) => {
                replacement.reject(&format!(
                    "Original order {} cancelled but replacement failed: {}",
                    original.id, e
                ))?;
                self.orders.update(&replacement).await?;
                self.publish_order(&replacement);
                Err(EngineError::Gateway(e))
            }
        }
    }

    /// Applies a per-trade fill event from the user stream (or drift repair).
    /// An order that already reached a terminal state absorbs nothing; the
    /// unique exchange trade id dedupes the trade insert.
    pub async fn record_fill(&self, fill: FillEvent) -> Result<(), EngineError> {
        let Some(mut order) = self.orders.find_by_exchange_id(&fill.exchange_order_id).await?
        else {
            tracing::debug!(
                exchange_order_id = %fill.exchange_order_id,
                "Fill for unknown order, ignoring"
            );
            return Ok(());
        };

        match order.fill(
            fill.quantity,
            fill.price,
            fill.commission,
            &fill.commission_asset,
        ) {
            Ok(()) => {
                self.orders.update(&order).await?;
                self.publish_order(&order);
            }
            // Terminal already (e.g. the submission ack covered this fill).
            Err(core_types::CoreError::InvalidTransition(_)) => return Ok(()),
            Err(e) => return Err(EngineError::Order(e)),
        }

        let trade = Trade {
            id: Uuid::new_v4(),
            order_id: order.id,
            bot_id: order.bot_id,
            user_id: order.user_id,
            symbol: fill.symbol,
            side: fill.side,
            price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            commission_asset: fill.commission_asset,
            realized_pnl: fill.realized_pnl,
            exchange_trade_id: fill.exchange_trade_id,
            executed_at: fill.executed_at,
        };
        self.store_trade(trade).await
    }
}

/// Spawns a consumer that applies user-stream events (fills, order updates)
/// through the order service until the stream closes.
pub fn spawn_user_stream_consumer(
    gateway: Arc<dyn ExchangeGateway>,
    service: Arc<OrderService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match gateway.stream_user_events().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open user event stream");
                return;
            }
        };
        while let Some(event) = stream.recv().await {
            match event {
                UserEvent::Fill(fill) => {
                    if let Err(e) = service.record_fill(fill).await {
                        tracing::error!(error = %e, "Failed to record fill");
                    }
                }
                UserEvent::OrderUpdate(report) => {
                    if let Err(e) = apply_order_update(&service, report).await {
                        tracing::error!(error = %e, "Failed to apply order update");
                    }
                }
            }
        }
        tracing::warn!("User event stream closed");
    })
}

async fn apply_order_update(
    service: &OrderService,
    report: gateway::OrderStatusReport,
) -> Result<(), EngineError> {
    let Some(mut order) = service
        .orders
        .find_by_exchange_id(&report.exchange_order_id)
        .await?
    else {
        return Ok(());
    };
    if order.status == report.status || !order.is_active() {
        return Ok(());
    }

    let applied = match report.status {
        core_types::OrderStatus::Cancelled => order.cancel(Some("Cancelled on exchange")).is_ok(),
        core_types::OrderStatus::Rejected => order.reject("Rejected by exchange").is_ok(),
        core_types::OrderStatus::Expired => order.expire().is_ok(),
        _ => false,
    };
    if applied {
        service.orders.update(&order).await?;
        service.publish_order(&order);
    }
    Ok(())
}
