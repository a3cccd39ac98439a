use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{
    MarginMode, OrderSide, OrderStatus, OrderType, PositionSide, TimeInForce, WorkingType,
};
use crate::error::CoreError;
use crate::position;

/// Cumulative execution details of an order.
///
/// Partial-fill updates are monotonically additive; the average price is
/// quote-volume-weighted. Commission is tracked in whatever asset the
/// exchange reports, with no cross-asset conversion at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExecution {
    pub executed_quantity: Decimal,
    pub executed_quote: Decimal,
    pub average_price: Option<Decimal>,
    pub commission: Decimal,
    pub commission_asset: String,
}

impl Default for OrderExecution {
    fn default() -> Self {
        Self {
            executed_quantity: Decimal::ZERO,
            executed_quote: Decimal::ZERO,
            average_price: None,
            commission: Decimal::ZERO,
            commission_asset: "USDT".to_string(),
        }
    }
}

/// A trading order and its local state machine.
///
/// `PENDING` (created locally) -> `NEW` (exchange ack) -> `PARTIALLY_FILLED`
/// -> `FILLED`, with `CANCELLED`, `REJECTED` and `EXPIRED` as the other
/// terminal states. Terminal states are absorbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bot_id: Option<Uuid>,
    pub connection_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// For trailing stops, in percent.
    pub callback_rate: Option<Decimal>,

    pub position_side: PositionSide,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub close_position: bool,
    pub working_type: WorkingType,
    pub leverage: u32,
    pub margin_mode: MarginMode,

    pub exchange_order_id: Option<String>,
    pub client_order_id: String,
    /// Set on the replacement leg of a cancel-and-replace.
    pub replaces_order_id: Option<Uuid>,

    pub execution: OrderExecution,
    pub status: OrderStatus,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Parameters shared by every constructor.
pub struct NewOrder {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub bot_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub position_side: PositionSide,
    pub reduce_only: bool,
    pub leverage: u32,
    pub margin_mode: MarginMode,
}

impl Order {
    fn base(params: NewOrder, order_type: OrderType) -> Result<Self, CoreError> {
        if params.quantity <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "quantity".to_string(),
                "must be positive".to_string(),
            ));
        }
        position::validate_leverage(params.leverage)?;

        let now = Utc::now();
        let id = Uuid::new_v4();
        Ok(Self {
            id,
            user_id: params.user_id,
            bot_id: params.bot_id,
            connection_id: params.connection_id,
            symbol: params.symbol,
            side: params.side,
            order_type,
            quantity: params.quantity,
            price: None,
            stop_price: None,
            callback_rate: None,
            position_side: params.position_side,
            time_in_force: TimeInForce::Gtc,
            reduce_only: params.reduce_only,
            close_position: false,
            working_type: WorkingType::ContractPrice,
            leverage: params.leverage,
            margin_mode: params.margin_mode,
            exchange_order_id: None,
            client_order_id: id.simple().to_string(),
            replaces_order_id: None,
            execution: OrderExecution::default(),
            status: OrderStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            filled_at: None,
            cancelled_at: None,
        })
    }

    pub fn market(params: NewOrder) -> Result<Self, CoreError> {
        Self::base(params, OrderType::Market)
    }

    pub fn limit(
        params: NewOrder,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Self, CoreError> {
        if price <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "price".to_string(),
                "must be positive".to_string(),
            ));
        }
        let mut order = Self::base(params, OrderType::Limit)?;
        order.price = Some(price);
        order.time_in_force = time_in_force;
        Ok(order)
    }

    pub fn stop_market(
        params: NewOrder,
        stop_price: Decimal,
        working_type: WorkingType,
    ) -> Result<Self, CoreError> {
        if stop_price <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "stop_price".to_string(),
                "must be positive".to_string(),
            ));
        }
        let mut order = Self::base(params, OrderType::StopMarket)?;
        order.stop_price = Some(stop_price);
        order.working_type = working_type;
        Ok(order)
    }

    /// Marks the order as acknowledged by the exchange.
    pub fn submit(
        &mut self,
        exchange_order_id: String,
        client_order_id: Option<String>,
    ) -> Result<(), CoreError> {
        if self.status != OrderStatus::Pending {
            return Err(CoreError::InvalidTransition(format!(
                "cannot submit order in {} status",
                self.status.as_str()
            )));
        }
        self.status = OrderStatus::New;
        self.exchange_order_id = Some(exchange_order_id);
        if let Some(cid) = client_order_id {
            self.client_order_id = cid;
        }
        let now = Utc::now();
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Applies a fill execution, accumulating into the execution aggregate
    /// and promoting to `PARTIALLY_FILLED` or `FILLED`.
    pub fn fill(
        &mut self,
        executed_quantity: Decimal,
        executed_price: Decimal,
        commission: Decimal,
        commission_asset: &str,
    ) -> Result<(), CoreError> {
        if !matches!(self.status, OrderStatus::New | OrderStatus::PartiallyFilled) {
            return Err(CoreError::InvalidTransition(format!(
                "cannot fill order in {} status",
                self.status.as_str()
            )));
        }
        if executed_quantity <= Decimal::ZERO || executed_price <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "fill".to_string(),
                "quantity and price must be positive".to_string(),
            ));
        }

        let total_executed = self.execution.executed_quantity + executed_quantity;
        let total_quote = self.execution.executed_quote + executed_quantity * executed_price;

        self.execution = OrderExecution {
            executed_quantity: total_executed,
            executed_quote: total_quote,
            average_price: if total_executed > Decimal::ZERO {
                Some(total_quote / total_executed)
            } else {
                None
            },
            commission: self.execution.commission + commission,
            commission_asset: commission_asset.to_string(),
        };

        let now = Utc::now();
        if total_executed >= self.quantity {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(now);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<&str>) -> Result<(), CoreError> {
        if !self.status.is_active() {
            return Err(CoreError::InvalidTransition(format!(
                "cannot cancel order in {} status",
                self.status.as_str()
            )));
        }
        self.status = OrderStatus::Cancelled;
        let now = Utc::now();
        self.cancelled_at = Some(now);
        self.updated_at = now;
        if let Some(reason) = reason {
            self.error_message = Some(reason.to_string());
        }
        Ok(())
    }

    pub fn reject(&mut self, reason: &str) -> Result<(), CoreError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::New) {
            return Err(CoreError::InvalidTransition(format!(
                "cannot reject order in {} status",
                self.status.as_str()
            )));
        }
        self.status = OrderStatus::Rejected;
        self.error_message = Some(reason.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applied by reconciliation when the exchange reports the order expired.
    pub fn expire(&mut self) -> Result<(), CoreError> {
        if !self.status.is_active() {
            return Err(CoreError::InvalidTransition(format!(
                "cannot expire order in {} status",
                self.status.as_str()
            )));
        }
        self.status = OrderStatus::Expired;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.execution.executed_quantity
    }

    pub fn fill_percentage(&self) -> Decimal {
        if self.quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.execution.executed_quantity / self.quantity * Decimal::from(100)
    }

    /// Builds the replacement leg of a cancel-and-replace, carrying over
    /// everything except the overridden fields and a fresh identity.
    pub fn clone_for_replacement(
        &self,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
        new_stop_price: Option<Decimal>,
    ) -> Result<Order, CoreError> {
        let quantity = new_quantity.unwrap_or(self.quantity);
        if quantity <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "quantity".to_string(),
                "must be positive".to_string(),
            ));
        }
        let mut replacement = self.clone();
        let id = Uuid::new_v4();
        let now = Utc::now();
        replacement.id = id;
        replacement.client_order_id = id.simple().to_string();
        replacement.quantity = quantity;
        if new_price.is_some() {
            replacement.price = new_price;
        }
        if new_stop_price.is_some() {
            replacement.stop_price = new_stop_price;
        }
        replacement.replaces_order_id = Some(self.id);
        replacement.exchange_order_id = None;
        replacement.execution = OrderExecution::default();
        replacement.status = OrderStatus::Pending;
        replacement.error_message = None;
        replacement.created_at = now;
        replacement.updated_at = now;
        replacement.submitted_at = None;
        replacement.filled_at = None;
        replacement.cancelled_at = None;
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_limit() -> Order {
        Order::limit(
            NewOrder {
                user_id: Uuid::new_v4(),
                connection_id: Uuid::new_v4(),
                bot_id: None,
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                quantity: dec!(2.0),
                position_side: PositionSide::Both,
                reduce_only: false,
                leverage: 10,
                margin_mode: MarginMode::Isolated,
            },
            dec!(50000),
            TimeInForce::Gtc,
        )
        .unwrap()
    }

    #[test]
    fn submit_moves_pending_to_new() {
        let mut order = new_limit();
        assert_eq!(order.status, OrderStatus::Pending);
        order.submit("X1".to_string(), None).unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert!(order.submitted_at.is_some());
        assert_eq!(order.exchange_order_id.as_deref(), Some("X1"));
    }

    #[test]
    fn partial_fills_accumulate_and_average() {
        let mut order = new_limit();
        order.submit("X1".to_string(), None).unwrap();

        order
            .fill(dec!(0.5), dec!(50000), dec!(0.1), "USDT")
            .unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert!(order.is_active());

        order
            .fill(dec!(1.5), dec!(49000), dec!(0.3), "USDT")
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.filled_at.is_some());
        assert_eq!(order.execution.executed_quantity, dec!(2.0));
        // (0.5*50000 + 1.5*49000) / 2.0
        assert_eq!(order.execution.average_price, Some(dec!(49250)));
        assert_eq!(order.execution.commission, dec!(0.4));
        assert!(order.execution.executed_quantity <= order.quantity);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut order = new_limit();
        order.submit("X1".to_string(), None).unwrap();
        order.cancel(Some("user requested")).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        let err = order.cancel(None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
        let err = order.fill(dec!(1), dec!(1), dec!(0), "USDT").unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn reject_only_from_pending_or_new() {
        let mut order = new_limit();
        order.submit("X1".to_string(), None).unwrap();
        order.fill(dec!(0.5), dec!(50000), dec!(0), "USDT").unwrap();
        assert!(order.reject("late").is_err());
    }

    #[test]
    fn active_iff_pending_new_or_partially_filled() {
        let mut order = new_limit();
        assert!(order.is_active());
        order.submit("X1".to_string(), None).unwrap();
        assert!(order.is_active());
        order.fill(dec!(0.5), dec!(50000), dec!(0), "USDT").unwrap();
        assert!(order.is_active());
        order.fill(dec!(1.5), dec!(50000), dec!(0), "USDT").unwrap();
        assert!(!order.is_active());
        assert!(order.is_filled());
    }

    #[test]
    fn replacement_carries_lineage_and_fresh_state() {
        let mut order = new_limit();
        order.submit("X1".to_string(), None).unwrap();

        let replacement = order
            .clone_for_replacement(Some(dec!(1.5)), Some(dec!(49500)), None)
            .unwrap();
        assert_eq!(replacement.replaces_order_id, Some(order.id));
        assert_eq!(replacement.quantity, dec!(1.5));
        assert_eq!(replacement.price, Some(dec!(49500)));
        assert_eq!(replacement.status, OrderStatus::Pending);
        assert!(replacement.exchange_order_id.is_none());
        assert_ne!(replacement.client_order_id, order.client_order_id);
    }

    #[test]
    fn leverage_bounds_enforced_at_construction() {
        for (leverage, ok) in [(0u32, false), (1, true), (125, true), (126, false)] {
            let result = Order::market(NewOrder {
                user_id: Uuid::new_v4(),
                connection_id: Uuid::new_v4(),
                bot_id: None,
                symbol: "ETHUSDT".to_string(),
                side: OrderSide::Sell,
                quantity: dec!(1),
                position_side: PositionSide::Both,
                reduce_only: false,
                leverage,
                margin_mode: MarginMode::Cross,
            });
            assert_eq!(result.is_ok(), ok, "leverage {}", leverage);
        }
    }
}
