use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::OrderSide;

/// Immutable record of a single fill. `exchange_trade_id` is unique across
/// the platform, which is what makes trade recording idempotent under
/// reconciliation replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub order_id: Uuid,
    pub bot_id: Option<Uuid>,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub realized_pnl: Decimal,
    pub exchange_trade_id: String,
    pub executed_at: DateTime<Utc>,
}
