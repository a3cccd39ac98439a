use chrono::{DateTime, Utc};
use core_types::{BotStats, Trade};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::bots::BotRepository;
use crate::error::DbError;
use crate::map::{enum_from_str, enum_to_str};

#[derive(Debug, Clone, FromRow)]
struct TradeRow {
    id: Uuid,
    order_id: Uuid,
    bot_id: Option<Uuid>,
    user_id: Uuid,
    symbol: String,
    side: String,
    price: Decimal,
    quantity: Decimal,
    commission: Decimal,
    commission_asset: String,
    realized_pnl: Decimal,
    exchange_trade_id: String,
    executed_at: DateTime<Utc>,
}

impl TradeRow {
    fn into_entity(self) -> Result<Trade, DbError> {
        Ok(Trade {
            id: self.id,
            order_id: self.order_id,
            bot_id: self.bot_id,
            user_id: self.user_id,
            symbol: self.symbol,
            side: enum_from_str("side", &self.side)?,
            price: self.price,
            quantity: self.quantity,
            commission: self.commission,
            commission_asset: self.commission_asset,
            realized_pnl: self.realized_pnl,
            exchange_trade_id: self.exchange_trade_id,
            executed_at: self.executed_at,
        })
    }
}

/// Outcome of recording a trade.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The trade was new; if it belonged to a bot, the recomputed stats are
    /// included for fan-out.
    Inserted(Option<BotStats>),
    /// A trade with this exchange id already existed; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: PgPool,
}

impl TradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a trade and, in the same transaction, recomputes the owning
    /// bot's cumulative stats from the full trade history.
    ///
    /// The insert is idempotent on `exchange_trade_id`: replaying the same
    /// fill leaves the trades table and the bot row untouched. Recomputation
    /// is deterministic over the trade set, so replays converge.
    pub async fn record(&self, trade: &Trade) -> Result<RecordOutcome, DbError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO trades (
                id, order_id, bot_id, user_id, symbol, side, price, quantity,
                commission, commission_asset, realized_pnl, exchange_trade_id, executed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (exchange_trade_id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(trade.order_id)
        .bind(trade.bot_id)
        .bind(trade.user_id)
        .bind(&trade.symbol)
        .bind(enum_to_str(&trade.side)?)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.commission)
        .bind(&trade.commission_asset)
        .bind(trade.realized_pnl)
        .bind(&trade.exchange_trade_id)
        .bind(trade.executed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(RecordOutcome::Duplicate);
        }

        let stats = if let Some(bot_id) = trade.bot_id {
            // Re-aggregate from history rather than incrementing; walking the
            // trades in execution order also yields the streaks.
            let pnls = sqlx::query_scalar::<_, Decimal>(
                "SELECT realized_pnl FROM trades WHERE bot_id = $1 ORDER BY executed_at ASC, id ASC",
            )
            .bind(bot_id)
            .fetch_all(&mut *tx)
            .await?;

            let stats = BotStats::from_pnls(&pnls);
            BotRepository::write_stats(&mut tx, bot_id, &stats).await?;
            Some(stats)
        } else {
            None
        };

        tx.commit().await?;
        Ok(RecordOutcome::Inserted(stats))
    }

    /// Recomputes one bot's stats from its full trade history, outside the
    /// insert path. Used by the self-healing refresh job.
    pub async fn recompute_stats(&self, bot_id: Uuid) -> Result<BotStats, DbError> {
        let mut tx = self.pool.begin().await?;
        let pnls = sqlx::query_scalar::<_, Decimal>(
            "SELECT realized_pnl FROM trades WHERE bot_id = $1 ORDER BY executed_at ASC, id ASC",
        )
        .bind(bot_id)
        .fetch_all(&mut *tx)
        .await?;

        let stats = BotStats::from_pnls(&pnls);
        BotRepository::write_stats(&mut tx, bot_id, &stats).await?;
        tx.commit().await?;
        Ok(stats)
    }

    pub async fn list_by_bot(&self, bot_id: Uuid) -> Result<Vec<Trade>, DbError> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT * FROM trades WHERE bot_id = $1 ORDER BY executed_at ASC",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TradeRow::into_entity).collect()
    }

    pub async fn list_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Trade>, DbError> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT * FROM trades WHERE user_id = $1 ORDER BY executed_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TradeRow::into_entity).collect()
    }
}
