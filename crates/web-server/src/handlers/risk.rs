use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use core_types::{RiskAlert, RiskLimit, RiskLimitKind, RiskMetrics};
use events::{WsMessage, channels};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateLimitRequest {
    pub kind: RiskLimitKind,
    pub limit_value: Decimal,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub warning_threshold: Option<Decimal>,
    #[serde(default)]
    pub critical_threshold: Option<Decimal>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_limit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateLimitRequest>,
) -> Result<Json<RiskLimit>, ApiError> {
    let now = Utc::now();
    let limit = RiskLimit {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        kind: request.kind,
        limit_value: request.limit_value,
        symbol: request.symbol.map(|s| s.to_uppercase()),
        warning_threshold: request
            .warning_threshold
            .unwrap_or(RiskLimit::DEFAULT_WARNING_THRESHOLD),
        critical_threshold: request
            .critical_threshold
            .unwrap_or(RiskLimit::DEFAULT_CRITICAL_THRESHOLD),
        enabled: request.enabled,
        created_at: now,
        updated_at: now,
    };
    limit.validate()?;
    state.risk_limits.create_limit(&limit).await?;
    Ok(Json(limit))
}

pub async fn list_limits(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<RiskLimit>>, ApiError> {
    Ok(Json(state.risk_limits.list_limits(user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLimitRequest {
    #[serde(default)]
    pub limit_value: Option<Decimal>,
    #[serde(default)]
    pub warning_threshold: Option<Decimal>,
    #[serde(default)]
    pub critical_threshold: Option<Decimal>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn update_limit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLimitRequest>,
) -> Result<Json<RiskLimit>, ApiError> {
    let mut limit = state
        .risk_limits
        .find_limit(user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Risk limit"))?;

    if let Some(limit_value) = request.limit_value {
        limit.limit_value = limit_value;
    }
    if let Some(warning) = request.warning_threshold {
        limit.warning_threshold = warning;
    }
    if let Some(critical) = request.critical_threshold {
        limit.critical_threshold = critical;
    }
    if let Some(enabled) = request.enabled {
        limit.enabled = enabled;
    }
    limit.validate()?;
    state.risk_limits.update_limit(&limit).await?;
    Ok(Json(limit))
}

pub async fn delete_limit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    state.risk_limits.delete_limit(user.user_id, id).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    #[serde(default)]
    pub unacknowledged: bool,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Json<Vec<RiskAlert>>, ApiError> {
    Ok(Json(
        state
            .risk_limits
            .list_alerts(user.user_id, query.unacknowledged)
            .await?,
    ))
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    state
        .risk_limits
        .acknowledge_alert(user.user_id, id)
        .await?;
    Ok(Json(json!({ "acknowledged": true })))
}

#[derive(Debug, Deserialize)]
pub struct MonitorRequest {
    pub metrics: RiskMetrics,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Evaluates the caller's enabled limits against the supplied metrics,
/// persisting and fanning out any alerts produced.
pub async fn monitor(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<MonitorRequest>,
) -> Result<Json<Vec<RiskAlert>>, ApiError> {
    let limits = state.risk_limits.list_enabled_limits(user.user_id).await?;
    let alerts = state.risk_monitor.evaluate(
        &limits,
        &request.metrics,
        request.symbol.as_deref(),
    );

    for alert in &alerts {
        state.risk_limits.insert_alert(alert).await?;
        state.bus.publish_to_user(
            user.user_id,
            channels::RISK,
            WsMessage::RiskAlert(alert.clone()),
        );
    }

    Ok(Json(alerts))
}
