use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use configuration::JwtSettings;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Claims carried by both token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique token id.
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

/// Issues and validates the access/refresh token pair.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(settings: &JwtSettings) -> Result<Self, ApiError> {
        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|_| ApiError::internal(format!("Unknown JWT algorithm: {}", settings.algorithm)))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
            algorithm,
            access_ttl: Duration::minutes(settings.access_token_expire_minutes),
            refresh_ttl: Duration::days(settings.refresh_token_expire_days),
        })
    }

    fn issue(&self, user_id: Uuid, token_type: &str, ttl: Duration) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: token_type.to_string(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    pub fn create_pair(&self, user_id: Uuid) -> Result<TokenPair, ApiError> {
        Ok(TokenPair {
            access_token: self.issue(user_id, TOKEN_TYPE_ACCESS, self.access_ttl)?,
            refresh_token: self.issue(user_id, TOKEN_TYPE_REFRESH, self.refresh_ttl)?,
            token_type: "Bearer",
        })
    }

    /// Validates signature, expiry and token type, returning the subject.
    pub fn verify(&self, token: &str, expected_type: &str) -> Result<Uuid, ApiError> {
        let validation = Validation::new(self.algorithm);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
        if data.claims.token_type != expected_type {
            return Err(ApiError::unauthorized(format!(
                "Token is not an {} token",
                expected_type
            )));
        }
        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError::unauthorized("Malformed token subject"))
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

/// The authenticated caller, extracted from a bearer header or (for
/// WebSocket upgrades) a `token` query parameter.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token_from_header = parts
            .headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::to_string);

        let token_from_query = parts.uri.query().and_then(|query| {
            query
                .split('&')
                .find(|pair| pair.starts_with("token="))
                .and_then(|pair| pair.split('=').nth(1))
                .map(str::to_string)
        });

        let token = token_from_header
            .or(token_from_query)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization token"))?;

        let user_id = state.jwt.verify(&token, TOKEN_TYPE_ACCESS)?;
        let user = state
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;
        if !user.is_active {
            return Err(ApiError::unauthorized("User is deactivated"));
        }
        Ok(AuthUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new(&JwtSettings {
            secret: "test-secret-key-12345".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        })
        .unwrap()
    }

    #[test]
    fn pair_round_trips_with_correct_types() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let pair = keys.create_pair(user_id).unwrap();

        assert_eq!(keys.verify(&pair.access_token, TOKEN_TYPE_ACCESS).unwrap(), user_id);
        assert_eq!(
            keys.verify(&pair.refresh_token, TOKEN_TYPE_REFRESH).unwrap(),
            user_id
        );
    }

    #[test]
    fn wrong_token_type_is_rejected() {
        let keys = keys();
        let pair = keys.create_pair(Uuid::new_v4()).unwrap();
        assert!(keys.verify(&pair.refresh_token, TOKEN_TYPE_ACCESS).is_err());
        assert!(keys.verify(&pair.access_token, TOKEN_TYPE_REFRESH).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let keys = keys();
        let pair = keys.create_pair(Uuid::new_v4()).unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        assert!(keys.verify(&tampered, TOKEN_TYPE_ACCESS).is_err());
        assert!(keys.verify("not.a.token", TOKEN_TYPE_ACCESS).is_err());
    }

    #[test]
    fn different_secrets_do_not_cross_validate() {
        let a = keys();
        let b = JwtKeys::new(&JwtSettings {
            secret: "another-secret".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        })
        .unwrap();
        let pair = a.create_pair(Uuid::new_v4()).unwrap();
        assert!(b.verify(&pair.access_token, TOKEN_TYPE_ACCESS).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }
}
