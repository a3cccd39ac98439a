use chrono::{DateTime, Utc};
use core_types::{RiskAlert, RiskLimit};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::DbError;
use crate::map::{enum_from_str, enum_to_str};

#[derive(Debug, Clone, FromRow)]
struct RiskLimitRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    limit_value: Decimal,
    symbol: Option<String>,
    warning_threshold: Decimal,
    critical_threshold: Decimal,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RiskLimitRow {
    fn into_entity(self) -> Result<RiskLimit, DbError> {
        Ok(RiskLimit {
            id: self.id,
            user_id: self.user_id,
            kind: enum_from_str("kind", &self.kind)?,
            limit_value: self.limit_value,
            symbol: self.symbol,
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct RiskAlertRow {
    id: Uuid,
    user_id: Uuid,
    risk_limit_id: Uuid,
    kind: String,
    message: String,
    severity: String,
    symbol: Option<String>,
    current_value: Decimal,
    limit_value: Decimal,
    violation_percentage: Decimal,
    acknowledged: bool,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
}

impl RiskAlertRow {
    fn into_entity(self) -> Result<RiskAlert, DbError> {
        Ok(RiskAlert {
            id: self.id,
            user_id: self.user_id,
            risk_limit_id: self.risk_limit_id,
            kind: enum_from_str("kind", &self.kind)?,
            message: self.message,
            severity: enum_from_str("severity", &self.severity)?,
            symbol: self.symbol,
            current_value: self.current_value,
            limit_value: self.limit_value,
            violation_percentage: self.violation_percentage,
            acknowledged: self.acknowledged,
            created_at: self.created_at,
            acknowledged_at: self.acknowledged_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RiskRepository {
    pool: PgPool,
}

impl RiskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_limit(&self, limit: &RiskLimit) -> Result<(), DbError> {
        limit.validate()?;
        sqlx::query(
            r#"
            INSERT INTO risk_limits (
                id, user_id, kind, limit_value, symbol,
                warning_threshold, critical_threshold, enabled, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(limit.id)
        .bind(limit.user_id)
        .bind(enum_to_str(&limit.kind)?)
        .bind(limit.limit_value)
        .bind(&limit.symbol)
        .bind(limit.warning_threshold)
        .bind(limit.critical_threshold)
        .bind(limit.enabled)
        .bind(limit.created_at)
        .bind(limit.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_limit(&self, user_id: Uuid, id: Uuid) -> Result<Option<RiskLimit>, DbError> {
        let row = sqlx::query_as::<_, RiskLimitRow>(
            "SELECT * FROM risk_limits WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RiskLimitRow::into_entity).transpose()
    }

    pub async fn list_limits(&self, user_id: Uuid) -> Result<Vec<RiskLimit>, DbError> {
        let rows = sqlx::query_as::<_, RiskLimitRow>(
            "SELECT * FROM risk_limits WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RiskLimitRow::into_entity).collect()
    }

    pub async fn list_enabled_limits(&self, user_id: Uuid) -> Result<Vec<RiskLimit>, DbError> {
        let rows = sqlx::query_as::<_, RiskLimitRow>(
            "SELECT * FROM risk_limits WHERE user_id = $1 AND enabled ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RiskLimitRow::into_entity).collect()
    }

    pub async fn update_limit(&self, limit: &RiskLimit) -> Result<(), DbError> {
        limit.validate()?;
        let result = sqlx::query(
            r#"
            UPDATE risk_limits SET
                limit_value = $1, symbol = $2,
                warning_threshold = $3, critical_threshold = $4,
                enabled = $5, updated_at = $6
            WHERE id = $7 AND user_id = $8
            "#,
        )
        .bind(limit.limit_value)
        .bind(&limit.symbol)
        .bind(limit.warning_threshold)
        .bind(limit.critical_threshold)
        .bind(limit.enabled)
        .bind(Utc::now())
        .bind(limit.id)
        .bind(limit.user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_limit(&self, user_id: Uuid, id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM risk_limits WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn insert_alert(&self, alert: &RiskAlert) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO risk_alerts (
                id, user_id, risk_limit_id, kind, message, severity, symbol,
                current_value, limit_value, violation_percentage,
                acknowledged, created_at, acknowledged_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(alert.id)
        .bind(alert.user_id)
        .bind(alert.risk_limit_id)
        .bind(enum_to_str(&alert.kind)?)
        .bind(&alert.message)
        .bind(enum_to_str(&alert.severity)?)
        .bind(&alert.symbol)
        .bind(alert.current_value)
        .bind(alert.limit_value)
        .bind(alert.violation_percentage)
        .bind(alert.acknowledged)
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_alerts(
        &self,
        user_id: Uuid,
        unacknowledged_only: bool,
    ) -> Result<Vec<RiskAlert>, DbError> {
        let rows = sqlx::query_as::<_, RiskAlertRow>(
            r#"
            SELECT * FROM risk_alerts
            WHERE user_id = $1 AND (NOT $2 OR NOT acknowledged)
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(unacknowledged_only)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RiskAlertRow::into_entity).collect()
    }

    pub async fn acknowledge_alert(&self, user_id: Uuid, id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE risk_alerts SET acknowledged = TRUE, acknowledged_at = $1
            WHERE id = $2 AND user_id = $3 AND NOT acknowledged
            "#,
        )
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
}
