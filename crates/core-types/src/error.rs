use thiserror::Error;

/// The transport-independent error taxonomy shared by every layer.
///
/// Aggregates refuse invariant-violating mutations locally, use-cases
/// translate their errors into one of these kinds, and the HTTP layer maps
/// kinds onto protocol status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, missing field, impossible state transition. Never retried.
    Validation,
    /// Invalid credentials, expired or wrong-typed token.
    Auth,
    NotFound,
    /// Duplicate email, duplicate connection name, resource still in use.
    Conflict,
    /// Network error, timeout, upstream 5xx. Retryable.
    ExchangeConnectivity,
    /// Bad-request-class response from the exchange. The order is rejected.
    ExchangeRejected,
    /// Upstream 429. Retryable with backoff.
    RateLimit,
    /// A balance or margin invariant would be violated. The mutation is refused whole.
    Invariant,
    /// Missing encryption key, unregistered handler, deserialisation bug.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ExchangeConnectivity => "exchange_connectivity",
            ErrorKind::ExchangeRejected => "exchange_rejected",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Invariant => "invariant",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(..) | CoreError::InvalidTransition(..) => ErrorKind::Validation,
            CoreError::Invariant(..) => ErrorKind::Invariant,
        }
    }
}
