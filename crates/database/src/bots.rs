use chrono::{DateTime, Utc};
use core_types::{Bot, BotConfiguration, BotStats, BotStatus};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::DbError;
use crate::map::{enum_from_str, enum_to_str};

#[derive(Debug, Clone, FromRow)]
struct BotRow {
    id: Uuid,
    user_id: Uuid,
    strategy_id: Uuid,
    connection_id: Uuid,
    name: String,
    symbol: String,
    base_quantity: Decimal,
    quote_quantity: Decimal,
    take_profit_percentage: Decimal,
    stop_loss_percentage: Decimal,
    strategy_settings: JsonValue,
    status: String,
    risk_level: i16,
    total_trades: i64,
    total_pnl: Decimal,
    winning_trades: i64,
    losing_trades: i64,
    current_win_streak: i64,
    current_loss_streak: i64,
    max_win_streak: i64,
    max_loss_streak: i64,
    last_error: Option<String>,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    active_order_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BotRow {
    fn into_entity(self) -> Result<Bot, DbError> {
        Ok(Bot {
            id: self.id,
            user_id: self.user_id,
            strategy_id: self.strategy_id,
            connection_id: self.connection_id,
            name: self.name,
            configuration: BotConfiguration {
                symbol: self.symbol,
                base_quantity: self.base_quantity,
                quote_quantity: self.quote_quantity,
                take_profit_percentage: self.take_profit_percentage,
                stop_loss_percentage: self.stop_loss_percentage,
                strategy_settings: self.strategy_settings,
            },
            status: enum_from_str("status", &self.status)?,
            risk_level: self.risk_level,
            stats: BotStats {
                total_trades: self.total_trades,
                total_pnl: self.total_pnl,
                winning_trades: self.winning_trades,
                losing_trades: self.losing_trades,
                current_win_streak: self.current_win_streak,
                current_loss_streak: self.current_loss_streak,
                max_win_streak: self.max_win_streak,
                max_loss_streak: self.max_loss_streak,
            },
            last_error: self.last_error,
            start_time: self.start_time,
            stop_time: self.stop_time,
            active_order_ids: self.active_order_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BotRepository {
    pool: PgPool,
}

impl BotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        strategy_id: Uuid,
        connection_id: Uuid,
        name: &str,
        configuration: &BotConfiguration,
        risk_level: i16,
    ) -> Result<Bot, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO bots (
                id, user_id, strategy_id, connection_id, name, symbol,
                base_quantity, quote_quantity, take_profit_percentage, stop_loss_percentage,
                strategy_settings, status, risk_level, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(strategy_id)
        .bind(connection_id)
        .bind(name)
        .bind(&configuration.symbol)
        .bind(configuration.base_quantity)
        .bind(configuration.quote_quantity)
        .bind(configuration.take_profit_percentage)
        .bind(configuration.stop_loss_percentage)
        .bind(&configuration.strategy_settings)
        .bind(enum_to_str(&BotStatus::Paused)?)
        .bind(risk_level)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or(DbError::NotFound)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Bot>, DbError> {
        let row = sqlx::query_as::<_, BotRow>("SELECT * FROM bots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BotRow::into_entity).transpose()
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Bot>, DbError> {
        let rows = sqlx::query_as::<_, BotRow>(
            "SELECT * FROM bots WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BotRow::into_entity).collect()
    }

    pub async fn list_all_ids(&self) -> Result<Vec<Uuid>, DbError> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM bots")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Ids of every bot the database believes is running; the status
    /// reconciliation job compares this against the live engine registry.
    pub async fn list_running_ids(&self) -> Result<Vec<Uuid>, DbError> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM bots WHERE status = $1")
            .bind(enum_to_str(&BotStatus::Running)?)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Atomically records a successful start: RUNNING, fresh start timestamp,
    /// cleared last error.
    pub async fn mark_running(&self, id: Uuid) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE bots SET status = $1, start_time = $2, last_error = NULL, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(enum_to_str(&BotStatus::Running)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_paused(&self, id: Uuid) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE bots SET status = $1, stop_time = $2, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(enum_to_str(&BotStatus::Paused)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE bots SET status = $1, last_error = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(enum_to_str(&BotStatus::Error)?)
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_last_error(&self, id: Uuid, message: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE bots SET last_error = $1, updated_at = $2 WHERE id = $3")
            .bind(message)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_configuration(
        &self,
        user_id: Uuid,
        id: Uuid,
        name: Option<&str>,
        configuration: &BotConfiguration,
        risk_level: i16,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE bots SET
                name = COALESCE($1, name),
                symbol = $2, base_quantity = $3, quote_quantity = $4,
                take_profit_percentage = $5, stop_loss_percentage = $6,
                strategy_settings = $7, risk_level = $8, updated_at = $9
            WHERE id = $10 AND user_id = $11
            "#,
        )
        .bind(name)
        .bind(&configuration.symbol)
        .bind(configuration.base_quantity)
        .bind(configuration.quote_quantity)
        .bind(configuration.take_profit_percentage)
        .bind(configuration.stop_loss_percentage)
        .bind(&configuration.strategy_settings)
        .bind(risk_level)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM bots WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Writes recomputed stats inside the trade-recording transaction.
    pub(crate) async fn write_stats(
        tx: &mut Transaction<'_, Postgres>,
        bot_id: Uuid,
        stats: &BotStats,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE bots SET
                total_trades = $1, total_pnl = $2,
                winning_trades = $3, losing_trades = $4,
                current_win_streak = $5, current_loss_streak = $6,
                max_win_streak = $7, max_loss_streak = $8,
                updated_at = $9
            WHERE id = $10
            "#,
        )
        .bind(stats.total_trades)
        .bind(stats.total_pnl)
        .bind(stats.winning_trades)
        .bind(stats.losing_trades)
        .bind(stats.current_win_streak)
        .bind(stats.current_loss_streak)
        .bind(stats.max_win_streak)
        .bind(stats.max_loss_streak)
        .bind(Utc::now())
        .bind(bot_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
