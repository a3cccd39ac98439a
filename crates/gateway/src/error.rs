use core_types::ErrorKind;
use thiserror::Error;

/// The failure taxonomy every adapter surfaces. Upper layers decide retry
/// behaviour from the variant, never from adapter-specific codes.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Exchange rejected credentials or signature: {0}")]
    Auth(String),

    #[error("Rate limited by exchange (retry after {retry_after_secs:?}s)")]
    RateLimit { retry_after_secs: Option<u64> },

    #[error("Exchange rejected request: {0}")]
    BadRequest(String),

    #[error("Exchange internal error: {0}")]
    Upstream(String),

    #[error("Unknown order on exchange: {0}")]
    NotFound(String),

    #[error("Failed to deserialize exchange response: {0}")]
    Deserialization(String),

    #[error("Unsupported exchange kind: {0}")]
    Unsupported(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connectivity(..) | GatewayError::Upstream(..) => {
                ErrorKind::ExchangeConnectivity
            }
            GatewayError::Auth(..) => ErrorKind::Auth,
            GatewayError::RateLimit { .. } => ErrorKind::RateLimit,
            GatewayError::BadRequest(..) => ErrorKind::ExchangeRejected,
            GatewayError::NotFound(..) => ErrorKind::NotFound,
            GatewayError::Deserialization(..) | GatewayError::Unsupported(..) => {
                ErrorKind::Internal
            }
        }
    }

    /// Transient failures are retried by jobs and skipped by the engine tick;
    /// everything else is fatal for the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Connectivity(..)
                | GatewayError::Upstream(..)
                | GatewayError::RateLimit { .. }
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            GatewayError::Connectivity(err.to_string())
        } else if err.is_decode() {
            GatewayError::Deserialization(err.to_string())
        } else {
            GatewayError::Connectivity(err.to_string())
        }
    }
}
