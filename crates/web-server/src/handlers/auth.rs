use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::AppState;
use crate::auth::{TOKEN_TYPE_REFRESH, TokenPair, hash_password, verify_password};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: uuid::Uuid,
    pub email: String,
    pub timezone: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), ApiError> {
    if !email.contains('@') || email.len() < 3 {
        return Err(ApiError::validation("A valid email address is required"));
    }
    if password.len() < 8 {
        return Err(ApiError::validation(
            "Password must be at least 8 characters",
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    validate_credentials(&request.email, &request.password)?;

    let password_hash = hash_password(&request.password)?;
    let timezone = request.timezone.as_deref().unwrap_or("UTC");
    let user = state
        .users
        .create(&request.email, &password_hash, timezone)
        .await?;

    let tokens = state.jwt.create_pair(user.id)?;
    tracing::info!(user_id = %user.id, "User registered");
    Ok(Json(AuthResponse {
        user: UserView {
            id: user.id,
            email: user.email,
            timezone: user.timezone,
        },
        tokens,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .users
        .find_by_email(&request.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }
    if !user.is_active {
        return Err(ApiError::unauthorized("User is deactivated"));
    }

    let tokens = state.jwt.create_pair(user.id)?;
    Ok(Json(AuthResponse {
        user: UserView {
            id: user.id,
            email: user.email,
            timezone: user.timezone,
        },
        tokens,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Rotates the access token using a refresh token.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let user_id = state
        .jwt
        .verify(&request.refresh_token, TOKEN_TYPE_REFRESH)?;

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;
    if !user.is_active {
        return Err(ApiError::unauthorized("User is deactivated"));
    }

    let tokens = state.jwt.create_pair(user.id)?;
    Ok(Json(json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_type": tokens.token_type,
    })))
}
