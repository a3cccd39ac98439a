use chrono::{DateTime, Utc};
use core_types::{Position, PositionStatus};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::DbError;
use crate::map::{enum_from_str, enum_to_str};

#[derive(Debug, Clone, FromRow)]
struct PositionRow {
    id: Uuid,
    user_id: Uuid,
    bot_id: Option<Uuid>,
    symbol: String,
    side: String,
    entry_price: Decimal,
    quantity: Decimal,
    leverage: i32,
    margin_mode: String,
    mark_price: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    liquidation_price: Option<Decimal>,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    status: String,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl PositionRow {
    fn into_entity(self) -> Result<Position, DbError> {
        Ok(Position {
            id: self.id,
            user_id: self.user_id,
            bot_id: self.bot_id,
            symbol: self.symbol,
            side: enum_from_str("side", &self.side)?,
            entry_price: self.entry_price,
            quantity: self.quantity,
            leverage: self.leverage as u32,
            margin_mode: enum_from_str("margin_mode", &self.margin_mode)?,
            mark_price: self.mark_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            liquidation_price: self.liquidation_price,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            status: enum_from_str("status", &self.status)?,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, position: &Position) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, user_id, bot_id, symbol, side, entry_price, quantity,
                leverage, margin_mode, mark_price, stop_loss, take_profit,
                liquidation_price, realized_pnl, unrealized_pnl, status, opened_at, closed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                mark_price = EXCLUDED.mark_price,
                stop_loss = EXCLUDED.stop_loss,
                take_profit = EXCLUDED.take_profit,
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                status = EXCLUDED.status,
                closed_at = EXCLUDED.closed_at
            "#,
        )
        .bind(position.id)
        .bind(position.user_id)
        .bind(position.bot_id)
        .bind(&position.symbol)
        .bind(enum_to_str(&position.side)?)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.leverage as i32)
        .bind(enum_to_str(&position.margin_mode)?)
        .bind(position.mark_price)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.liquidation_price)
        .bind(position.realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(enum_to_str(&position.status)?)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_open_by_user(&self, user_id: Uuid) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE user_id = $1 AND status = $2 ORDER BY opened_at ASC",
        )
        .bind(user_id)
        .bind(enum_to_str(&PositionStatus::Open)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PositionRow::into_entity).collect()
    }
}
