use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use core_types::{ConnectionStatus, ExchangeKind};
use database::{Connection, NewConnection};
use keystore::{ConnectionSecrets, Credentials, mask_key};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// The only shape a connection is ever returned in: the API key masked to
/// its last four characters, secrets never.
#[derive(Debug, Serialize)]
pub struct ConnectionView {
    pub id: Uuid,
    pub exchange: ExchangeKind,
    pub name: String,
    pub api_key: String,
    pub is_testnet: bool,
    pub status: ConnectionStatus,
    pub can_trade_spot: bool,
    pub can_trade_futures: bool,
    pub can_trade_margin: bool,
    pub is_read_only: bool,
    pub can_withdraw: bool,
    pub unsafe_connection: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn view(state: &AppState, connection: &Connection) -> ConnectionView {
    let masked = state
        .cipher
        .decrypt(&connection.secrets.mainnet.api_key)
        .map(|key| mask_key(&key))
        .unwrap_or_else(|_| "****".to_string());
    ConnectionView {
        id: connection.id,
        exchange: connection.exchange_kind,
        name: connection.name.clone(),
        api_key: masked,
        is_testnet: connection.is_testnet,
        status: connection.status,
        can_trade_spot: connection.can_trade_spot,
        can_trade_futures: connection.can_trade_futures,
        can_trade_margin: connection.can_trade_margin,
        is_read_only: connection.is_read_only,
        can_withdraw: connection.can_withdraw,
        unsafe_connection: connection.is_unsafe(),
        last_used_at: connection.last_used_at,
        created_at: connection.created_at,
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PermissionFlags {
    #[serde(default)]
    pub spot: bool,
    #[serde(default)]
    pub futures: bool,
    #[serde(default)]
    pub margin: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub withdraw: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub exchange: ExchangeKind,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub testnet_api_key: Option<String>,
    #[serde(default)]
    pub testnet_api_secret: Option<String>,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub permissions: PermissionFlags,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<Json<ConnectionView>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("Connection name is required"));
    }
    if request.api_key.is_empty() || request.api_secret.is_empty() {
        return Err(ApiError::validation("API key and secret are required"));
    }
    if request.is_testnet && request.testnet_api_key.is_none() {
        return Err(ApiError::validation(
            "A testnet connection needs a testnet key pair",
        ));
    }

    let testnet = match (&request.testnet_api_key, &request.testnet_api_secret) {
        (Some(key), Some(secret)) => Some(state.cipher.encrypt_pair(&Credentials {
            api_key: key.clone(),
            api_secret: secret.clone(),
        })),
        (None, None) => None,
        _ => {
            return Err(ApiError::validation(
                "Testnet key and secret must be provided together",
            ));
        }
    };

    let secrets = ConnectionSecrets {
        mainnet: state.cipher.encrypt_pair(&Credentials {
            api_key: request.api_key,
            api_secret: request.api_secret,
        }),
        testnet,
    };

    let connection = state
        .connections
        .create(NewConnection {
            user_id: user.user_id,
            exchange_kind: request.exchange,
            name: request.name.trim().to_string(),
            can_trade_spot: request.permissions.spot,
            can_trade_futures: request.permissions.futures,
            can_trade_margin: request.permissions.margin,
            is_read_only: request.permissions.read_only,
            can_withdraw: request.permissions.withdraw,
            is_testnet: request.is_testnet,
            secrets,
        })
        .await?;

    Ok(Json(view(&state, &connection)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ConnectionView>>, ApiError> {
    let connections = state.connections.list_by_user(user.user_id).await?;
    Ok(Json(connections.iter().map(|c| view(&state, c)).collect()))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionView>, ApiError> {
    let connection = state
        .connections
        .find_by_id(user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Connection"))?;
    Ok(Json(view(&state, &connection)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: String,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionView>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("Connection name is required"));
    }
    state
        .connections
        .update_name(user.user_id, id, request.name.trim())
        .await?;
    let connection = state
        .connections
        .find_by_id(user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Connection"))?;
    Ok(Json(view(&state, &connection)))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.connections.soft_delete(user.user_id, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
pub struct TestResult {
    pub status: ConnectionStatus,
    pub balance_assets: usize,
    pub error: Option<String>,
}

/// Runs a connectivity ping plus an account fetch and persists the outcome
/// on the connection.
pub async fn test(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TestResult>, ApiError> {
    let connection = state
        .connections
        .find_by_id(user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Connection"))?;

    let credentials = state
        .cipher
        .reveal(&connection.secrets, connection.is_testnet)?;
    let exchange = gateway::connect(
        connection.exchange_kind,
        &credentials.api_key,
        &credentials.api_secret,
        connection.is_testnet,
    )?;

    let outcome = async {
        exchange.test_connectivity().await?;
        exchange.get_account().await
    }
    .await;

    let (status, balance_assets, error) = match outcome {
        Ok(account) => (ConnectionStatus::Connected, account.balances.len(), None),
        Err(e) => (ConnectionStatus::Error, 0, Some(e.to_string())),
    };
    state.connections.update_status(id, status).await?;

    Ok(Json(TestResult {
        status,
        balance_assets,
        error,
    }))
}
