use chrono::{DateTime, Utc};
use core_types::{ConnectionStatus, ExchangeKind};
use keystore::{ConnectionSecrets, EncryptedPair};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{DbError, map_unique_violation};
use crate::map::{enum_from_str, enum_to_str};

/// A stored exchange connection. Credential columns hold Fernet ciphertext;
/// plaintext only ever exists transiently via the keystore.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub exchange_kind: ExchangeKind,
    pub name: String,
    pub can_trade_spot: bool,
    pub can_trade_futures: bool,
    pub can_trade_margin: bool,
    pub is_read_only: bool,
    pub can_withdraw: bool,
    pub is_testnet: bool,
    pub secrets: ConnectionSecrets,
    pub status: ConnectionStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// A connection able to withdraw funds is flagged unsafe to use for bots.
    pub fn is_unsafe(&self) -> bool {
        self.can_withdraw
    }

    /// Whether this connection may place orders: connected, not read-only,
    /// and holding at least one trade permission.
    pub fn can_place_orders(&self) -> bool {
        self.status == ConnectionStatus::Connected
            && !self.is_read_only
            && (self.can_trade_spot || self.can_trade_futures || self.can_trade_margin)
    }
}

pub struct NewConnection {
    pub user_id: Uuid,
    pub exchange_kind: ExchangeKind,
    pub name: String,
    pub can_trade_spot: bool,
    pub can_trade_futures: bool,
    pub can_trade_margin: bool,
    pub is_read_only: bool,
    pub can_withdraw: bool,
    pub is_testnet: bool,
    pub secrets: ConnectionSecrets,
}

#[derive(Debug, Clone, FromRow)]
struct ConnectionRow {
    id: Uuid,
    user_id: Uuid,
    exchange_kind: String,
    name: String,
    can_trade_spot: bool,
    can_trade_futures: bool,
    can_trade_margin: bool,
    is_read_only: bool,
    can_withdraw: bool,
    is_testnet: bool,
    api_key_encrypted: String,
    secret_key_encrypted: String,
    testnet_api_key_encrypted: Option<String>,
    testnet_secret_key_encrypted: Option<String>,
    status: String,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConnectionRow {
    fn into_entity(self) -> Result<Connection, DbError> {
        let testnet = match (self.testnet_api_key_encrypted, self.testnet_secret_key_encrypted) {
            (Some(api_key), Some(api_secret)) => Some(EncryptedPair {
                api_key,
                api_secret,
            }),
            _ => None,
        };
        Ok(Connection {
            id: self.id,
            user_id: self.user_id,
            exchange_kind: enum_from_str("exchange_kind", &self.exchange_kind)?,
            name: self.name,
            can_trade_spot: self.can_trade_spot,
            can_trade_futures: self.can_trade_futures,
            can_trade_margin: self.can_trade_margin,
            is_read_only: self.is_read_only,
            can_withdraw: self.can_withdraw,
            is_testnet: self.is_testnet,
            secrets: ConnectionSecrets {
                mainnet: EncryptedPair {
                    api_key: self.api_key_encrypted,
                    api_secret: self.secret_key_encrypted,
                },
                testnet,
            },
            status: enum_from_str("status", &self.status)?,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    pool: PgPool,
}

impl ConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewConnection) -> Result<Connection, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let status = ConnectionStatus::Disconnected;

        sqlx::query(
            r#"
            INSERT INTO api_connections (
                id, user_id, exchange_kind, name,
                can_trade_spot, can_trade_futures, can_trade_margin,
                is_read_only, can_withdraw, is_testnet,
                api_key_encrypted, secret_key_encrypted,
                testnet_api_key_encrypted, testnet_secret_key_encrypted,
                status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(id)
        .bind(new.user_id)
        .bind(enum_to_str(&new.exchange_kind)?)
        .bind(&new.name)
        .bind(new.can_trade_spot)
        .bind(new.can_trade_futures)
        .bind(new.can_trade_margin)
        .bind(new.is_read_only)
        .bind(new.can_withdraw)
        .bind(new.is_testnet)
        .bind(&new.secrets.mainnet.api_key)
        .bind(&new.secrets.mainnet.api_secret)
        .bind(new.secrets.testnet.as_ref().map(|p| p.api_key.clone()))
        .bind(new.secrets.testnet.as_ref().map(|p| p.api_secret.clone()))
        .bind(enum_to_str(&status)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "connection name"))?;

        self.find_by_id(new.user_id, id)
            .await?
            .ok_or(DbError::NotFound)
    }

    pub async fn find_by_id(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Connection>, DbError> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM api_connections WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ConnectionRow::into_entity).transpose()
    }

    /// Unscoped lookup for internal callers (the bot manager resolves the
    /// connection of a bot it already authorized).
    pub async fn get(&self, id: Uuid) -> Result<Option<Connection>, DbError> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM api_connections WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ConnectionRow::into_entity).transpose()
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Connection>, DbError> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT * FROM api_connections
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ConnectionRow::into_entity).collect()
    }

    pub async fn update_name(
        &self,
        user_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE api_connections SET name = $1, updated_at = $2
            WHERE id = $3 AND user_id = $4 AND deleted_at IS NULL
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "connection name"))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Persists the outcome of a connectivity test and stamps last use.
    pub async fn update_status(&self, id: Uuid, status: ConnectionStatus) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_connections SET status = $1, last_used_at = $2, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(enum_to_str(&status)?)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, user_id: Uuid, id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE api_connections SET deleted_at = $1, updated_at = $1
            WHERE id = $2 AND user_id = $3 AND deleted_at IS NULL
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
