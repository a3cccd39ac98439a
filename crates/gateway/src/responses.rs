use chrono::{DateTime, Utc};
use core_types::{OrderSide, OrderStatus};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::GatewayError;

/// The exchange's acknowledgement of a placed order. Market orders may come
/// back already (partially) executed.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub average_price: Option<Decimal>,
}

/// Canonical view of one order as the exchange reports it; reconciliation
/// reapplies this over local state.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AccountBalance {
    pub asset: String,
    pub balance: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub balances: Vec<AccountBalance>,
    pub can_trade: bool,
}

/// A single fill reported on the user event stream.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub symbol: String,
    pub side: OrderSide,
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub exchange_trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub realized_pnl: Decimal,
    pub order_status: OrderStatus,
    pub executed_at: DateTime<Utc>,
}

/// Account-scoped events from the exchange user stream.
#[derive(Debug, Clone)]
pub enum UserEvent {
    Fill(FillEvent),
    OrderUpdate(OrderStatusReport),
}

/// Market-scoped events from the exchange market stream.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Ticker(core_types::Ticker),
    Kline { symbol: String, kline: core_types::Kline },
}

// --- Raw wire structures ---

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrder {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub update_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawBalance {
    pub asset: String,
    pub balance: String,
    pub available_balance: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTicker {
    pub symbol: String,
    pub price: String,
}

// Intermediate struct for deserializing klines from the exchange API.
#[derive(Debug, Deserialize)]
pub(crate) struct RawKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub String,
);

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, GatewayError> {
    if value.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(value)
        .map_err(|e| GatewayError::Deserialization(format!("{}: {}", field, e)))
}

/// Maps the exchange's order status vocabulary onto the local state machine.
pub(crate) fn parse_status(value: &str) -> Result<OrderStatus, GatewayError> {
    match value {
        "NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "CANCELLED" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(GatewayError::Deserialization(format!(
            "unknown order status `{}`",
            other
        ))),
    }
}

impl RawOrder {
    pub(crate) fn into_report(self) -> Result<OrderStatusReport, GatewayError> {
        let average_price = parse_decimal("avgPrice", &self.avg_price)?;
        Ok(OrderStatusReport {
            exchange_order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            status: parse_status(&self.status)?,
            executed_quantity: parse_decimal("executedQty", &self.executed_qty)?,
            average_price: if average_price.is_zero() {
                None
            } else {
                Some(average_price)
            },
            updated_at: self
                .update_time
                .and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single()),
        })
    }

    pub(crate) fn into_ack(self) -> Result<OrderAck, GatewayError> {
        let average_price = parse_decimal("avgPrice", &self.avg_price)?;
        Ok(OrderAck {
            exchange_order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id,
            status: parse_status(&self.status)?,
            executed_quantity: parse_decimal("executedQty", &self.executed_qty)?,
            average_price: if average_price.is_zero() {
                None
            } else {
                Some(average_price)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_maps_to_state_machine() {
        assert_eq!(parse_status("CANCELED").unwrap(), OrderStatus::Cancelled);
        assert_eq!(
            parse_status("PARTIALLY_FILLED").unwrap(),
            OrderStatus::PartiallyFilled
        );
        assert!(parse_status("PENDING_NEW").is_err());
    }

    #[test]
    fn raw_order_parses_into_report() {
        let raw: RawOrder = serde_json::from_str(
            r#"{"orderId": 42, "clientOrderId": "abc", "symbol": "BTCUSDT",
                "status": "PARTIALLY_FILLED", "executedQty": "0.5", "avgPrice": "50000.0",
                "updateTime": 1700000000000}"#,
        )
        .unwrap();
        let report = raw.into_report().unwrap();
        assert_eq!(report.exchange_order_id, "42");
        assert_eq!(report.status, OrderStatus::PartiallyFilled);
        assert_eq!(report.executed_quantity.to_string(), "0.5");
        assert!(report.average_price.is_some());
    }
}
