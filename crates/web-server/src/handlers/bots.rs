use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use core_types::{Bot, BotConfiguration};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub strategy_id: Uuid,
    pub connection_id: Uuid,
    pub symbol: String,
    #[serde(default)]
    pub base_quantity: Decimal,
    #[serde(default)]
    pub quote_quantity: Decimal,
    #[serde(default)]
    pub take_profit_percentage: Decimal,
    #[serde(default)]
    pub stop_loss_percentage: Decimal,
    #[serde(default)]
    pub strategy_settings: Option<JsonValue>,
    #[serde(default = "default_risk_level")]
    pub risk_level: i16,
}

fn default_risk_level() -> i16 {
    1
}

fn validate_configuration(request: &CreateBotRequest) -> Result<BotConfiguration, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("Bot name is required"));
    }
    if request.symbol.trim().is_empty() {
        return Err(ApiError::validation("Symbol is required"));
    }
    if request.base_quantity < Decimal::ZERO || request.quote_quantity < Decimal::ZERO {
        return Err(ApiError::validation("Quantities cannot be negative"));
    }
    if !(1..=5).contains(&request.risk_level) {
        return Err(ApiError::validation("Risk level must be between 1 and 5"));
    }
    Ok(BotConfiguration {
        symbol: request.symbol.trim().to_uppercase(),
        base_quantity: request.base_quantity,
        quote_quantity: request.quote_quantity,
        take_profit_percentage: request.take_profit_percentage,
        stop_loss_percentage: request.stop_loss_percentage,
        strategy_settings: request
            .strategy_settings
            .clone()
            .unwrap_or_else(|| json!({})),
    })
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateBotRequest>,
) -> Result<Json<Bot>, ApiError> {
    let configuration = validate_configuration(&request)?;

    // The referenced strategy and connection must exist and be usable.
    let strategy = state
        .strategies
        .find_by_id(request.strategy_id)
        .await?
        .filter(|s| s.user_id.is_none() || s.user_id == Some(user.user_id))
        .ok_or_else(|| ApiError::not_found("Strategy"))?;
    if !strategy.is_active {
        return Err(ApiError::validation("Strategy is inactive"));
    }
    state
        .connections
        .find_by_id(user.user_id, request.connection_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Connection"))?;

    let bot = state
        .bots
        .create(
            user.user_id,
            request.strategy_id,
            request.connection_id,
            request.name.trim(),
            &configuration,
            request.risk_level,
        )
        .await?;
    Ok(Json(bot))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Bot>>, ApiError> {
    Ok(Json(state.bots.list_by_user(user.user_id).await?))
}

async fn owned_bot(state: &AppState, user_id: Uuid, id: Uuid) -> Result<Bot, ApiError> {
    state
        .bots
        .find_by_id(id)
        .await?
        .filter(|b| b.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("Bot"))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Bot>, ApiError> {
    Ok(Json(owned_bot(&state, user.user_id, id).await?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateBotRequest>,
) -> Result<Json<Bot>, ApiError> {
    let bot = owned_bot(&state, user.user_id, id).await?;
    if state.manager.is_running(bot.id).await {
        return Err(ApiError::conflict("Stop the bot before reconfiguring it"));
    }

    let configuration = validate_configuration(&request)?;
    state
        .bots
        .update_configuration(
            user.user_id,
            id,
            Some(request.name.trim()),
            &configuration,
            request.risk_level,
        )
        .await?;
    Ok(Json(owned_bot(&state, user.user_id, id).await?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let bot = owned_bot(&state, user.user_id, id).await?;
    if state.manager.is_running(bot.id).await {
        return Err(ApiError::conflict("Stop the bot before deleting it"));
    }
    state.bots.delete(user.user_id, id).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// Starts the bot. The acknowledgement may precede the engine reaching
/// `RUNNING`; poll the bot status for the outcome.
pub async fn start(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Bot>, ApiError> {
    owned_bot(&state, user.user_id, id).await?;
    state.manager.start_bot(id).await?;
    Ok(Json(owned_bot(&state, user.user_id, id).await?))
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Bot>, ApiError> {
    owned_bot(&state, user.user_id, id).await?;
    state.manager.stop_bot(id).await?;
    Ok(Json(owned_bot(&state, user.user_id, id).await?))
}

#[derive(Debug, Serialize)]
pub struct StrategyView {
    pub id: Uuid,
    pub name: String,
    pub type_tag: String,
    pub parameters: JsonValue,
    pub is_active: bool,
}

pub async fn list_strategies(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<StrategyView>>, ApiError> {
    let strategies = state.strategies.list_for_user(user.user_id).await?;
    Ok(Json(
        strategies
            .into_iter()
            .map(|s| StrategyView {
                id: s.id,
                name: s.name,
                type_tag: s.type_tag,
                parameters: s.parameters,
                is_active: s.is_active,
            })
            .collect(),
    ))
}
