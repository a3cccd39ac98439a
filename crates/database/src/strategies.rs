use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{DbError, map_unique_violation};

/// A stored strategy definition. `parameters` is the default parameter map
/// merged under a bot's own settings at engine start; `source_code` is only
/// set for user-supplied (sandboxed) strategies.
#[derive(Debug, Clone, FromRow)]
pub struct Strategy {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub type_tag: String,
    pub parameters: JsonValue,
    pub source_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StrategyRepository {
    pool: PgPool,
}

impl StrategyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: Option<Uuid>,
        name: &str,
        type_tag: &str,
        parameters: JsonValue,
    ) -> Result<Strategy, DbError> {
        let now = Utc::now();
        let strategy = Strategy {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            parameters,
            source_code: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO strategies (id, user_id, name, type_tag, parameters, source_code, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(strategy.id)
        .bind(strategy.user_id)
        .bind(&strategy.name)
        .bind(&strategy.type_tag)
        .bind(&strategy.parameters)
        .bind(&strategy.source_code)
        .bind(strategy.is_active)
        .bind(strategy.created_at)
        .bind(strategy.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "strategy name"))?;

        Ok(strategy)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Strategy>, DbError> {
        let strategy = sqlx::query_as::<_, Strategy>("SELECT * FROM strategies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(strategy)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Strategy>, DbError> {
        // Platform strategies (user_id IS NULL) are visible to everyone.
        let strategies = sqlx::query_as::<_, Strategy>(
            r#"
            SELECT * FROM strategies
            WHERE (user_id = $1 OR user_id IS NULL) AND is_active
            ORDER BY name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(strategies)
    }

    /// Seeds a built-in strategy definition if it is not already present.
    pub async fn seed_builtin(
        &self,
        name: &str,
        type_tag: &str,
        parameters: JsonValue,
    ) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO strategies (id, user_id, name, type_tag, parameters, is_active, created_at, updated_at)
            VALUES ($1, NULL, $2, $3, $4, TRUE, $5, $5)
            ON CONFLICT (name) WHERE user_id IS NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(type_tag)
        .bind(&parameters)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
