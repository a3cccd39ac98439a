use chrono::{DateTime, Utc};
use core_types::{Order, OrderExecution, OrderStatus};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::DbError;
use crate::map::{enum_from_str, enum_to_str};

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    bot_id: Option<Uuid>,
    connection_id: Uuid,
    symbol: String,
    side: String,
    order_type: String,
    quantity: Decimal,
    price: Option<Decimal>,
    stop_price: Option<Decimal>,
    callback_rate: Option<Decimal>,
    position_side: String,
    time_in_force: String,
    reduce_only: bool,
    close_position: bool,
    working_type: String,
    leverage: i32,
    margin_mode: String,
    exchange_order_id: Option<String>,
    client_order_id: String,
    replaces_order_id: Option<Uuid>,
    executed_quantity: Decimal,
    executed_quote: Decimal,
    average_price: Option<Decimal>,
    commission: Decimal,
    commission_asset: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    filled_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_entity(self) -> Result<Order, DbError> {
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            bot_id: self.bot_id,
            connection_id: self.connection_id,
            symbol: self.symbol,
            side: enum_from_str("side", &self.side)?,
            order_type: enum_from_str("order_type", &self.order_type)?,
            quantity: self.quantity,
            price: self.price,
            stop_price: self.stop_price,
            callback_rate: self.callback_rate,
            position_side: enum_from_str("position_side", &self.position_side)?,
            time_in_force: enum_from_str("time_in_force", &self.time_in_force)?,
            reduce_only: self.reduce_only,
            close_position: self.close_position,
            working_type: enum_from_str("working_type", &self.working_type)?,
            leverage: self.leverage as u32,
            margin_mode: enum_from_str("margin_mode", &self.margin_mode)?,
            exchange_order_id: self.exchange_order_id,
            client_order_id: self.client_order_id,
            replaces_order_id: self.replaces_order_id,
            execution: OrderExecution {
                executed_quantity: self.executed_quantity,
                executed_quote: self.executed_quote,
                average_price: self.average_price,
                commission: self.commission,
                commission_asset: self.commission_asset,
            },
            status: enum_from_str("status", &self.status)?,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            submitted_at: self.submitted_at,
            filled_at: self.filled_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

/// Listing filters for the orders endpoint.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub symbol: Option<String>,
    pub bot_id: Option<Uuid>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, order: &Order) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, bot_id, connection_id, symbol, side, order_type,
                quantity, price, stop_price, callback_rate,
                position_side, time_in_force, reduce_only, close_position, working_type,
                leverage, margin_mode, exchange_order_id, client_order_id, replaces_order_id,
                executed_quantity, executed_quote, average_price, commission, commission_asset,
                status, error_message, created_at, updated_at, submitted_at, filled_at, cancelled_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33
            )
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.bot_id)
        .bind(order.connection_id)
        .bind(&order.symbol)
        .bind(enum_to_str(&order.side)?)
        .bind(enum_to_str(&order.order_type)?)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.stop_price)
        .bind(order.callback_rate)
        .bind(enum_to_str(&order.position_side)?)
        .bind(enum_to_str(&order.time_in_force)?)
        .bind(order.reduce_only)
        .bind(order.close_position)
        .bind(enum_to_str(&order.working_type)?)
        .bind(order.leverage as i32)
        .bind(enum_to_str(&order.margin_mode)?)
        .bind(&order.exchange_order_id)
        .bind(&order.client_order_id)
        .bind(order.replaces_order_id)
        .bind(order.execution.executed_quantity)
        .bind(order.execution.executed_quote)
        .bind(order.execution.average_price)
        .bind(order.execution.commission)
        .bind(&order.execution.commission_asset)
        .bind(enum_to_str(&order.status)?)
        .bind(&order.error_message)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.filled_at)
        .bind(order.cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persists the mutable part of the aggregate: status, execution,
    /// exchange ids, error and lifecycle timestamps.
    pub async fn update(&self, order: &Order) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                exchange_order_id = $1, client_order_id = $2,
                executed_quantity = $3, executed_quote = $4, average_price = $5,
                commission = $6, commission_asset = $7,
                status = $8, error_message = $9, updated_at = $10,
                submitted_at = $11, filled_at = $12, cancelled_at = $13
            WHERE id = $14
            "#,
        )
        .bind(&order.exchange_order_id)
        .bind(&order.client_order_id)
        .bind(order.execution.executed_quantity)
        .bind(order.execution.executed_quote)
        .bind(order.execution.average_price)
        .bind(order.execution.commission)
        .bind(&order.execution.commission_asset)
        .bind(enum_to_str(&order.status)?)
        .bind(&order.error_message)
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.filled_at)
        .bind(order.cancelled_at)
        .bind(order.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DbError> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OrderRow::into_entity).transpose()
    }

    pub async fn find_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<Order>, DbError> {
        let row =
            sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE exchange_order_id = $1")
                .bind(exchange_order_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(OrderRow::into_entity).transpose()
    }

    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, DbError> {
        let page_size = filter.page_size.clamp(1, 200) as i64;
        let offset = filter.page.saturating_sub(1) as i64 * page_size;
        let status = filter
            .status
            .as_ref()
            .map(enum_to_str)
            .transpose()?;

        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT * FROM orders
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR symbol = $3)
              AND ($4::UUID IS NULL OR bot_id = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(&filter.symbol)
        .bind(filter.bot_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderRow::into_entity).collect()
    }

    /// Every locally-active order, the set reconciliation polls the exchange
    /// about.
    pub async fn list_active(&self) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE status IN ('PENDING', 'NEW', 'PARTIALLY_FILLED') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderRow::into_entity).collect()
    }
}
