use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use core_types::ErrorKind;
use serde_json::json;

/// The HTTP-facing error: a taxonomy kind plus a user-visible message.
/// Transport status codes are derived from the kind, never chosen ad hoc in
/// handlers.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation | ErrorKind::ExchangeRejected => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Invariant => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ExchangeConnectivity => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            tracing::error!(message = self.message, "Internal error");
        }
        let body = Json(json!({
            "error": self.kind.to_string(),
            "message": self.message,
        }));
        (self.status(), body).into_response()
    }
}

impl From<database::DbError> for ApiError {
    fn from(e: database::DbError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<engine::EngineError> for ApiError {
    fn from(e: engine::EngineError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<gateway::GatewayError> for ApiError {
    fn from(e: gateway::GatewayError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<core_types::CoreError> for ApiError {
    fn from(e: core_types::CoreError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<keystore::KeystoreError> for ApiError {
    fn from(e: keystore::KeystoreError) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::not_found("Bot").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::new(ErrorKind::RateLimit, "x").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::new(ErrorKind::ExchangeConnectivity, "x").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::new(ErrorKind::Invariant, "x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
