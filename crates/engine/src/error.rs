use core_types::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Bot {0} not found")]
    BotNotFound(Uuid),

    #[error("Bot {0} is not running")]
    NotRunning(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] gateway::GatewayError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Credential error: {0}")]
    Keystore(#[from] keystore::KeystoreError),

    #[error("Order error: {0}")]
    Order(#[from] core_types::CoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BotNotFound(..) | EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::NotRunning(..) | EngineError::InvalidState(..) => ErrorKind::Validation,
            EngineError::Validation(..) => ErrorKind::Validation,
            EngineError::Database(e) => e.kind(),
            EngineError::Gateway(e) => e.kind(),
            EngineError::Strategy(strategies::StrategyError::Gateway(e)) => e.kind(),
            EngineError::Strategy(..) => ErrorKind::Validation,
            EngineError::Keystore(..) => ErrorKind::Internal,
            EngineError::Order(e) => e.kind(),
        }
    }
}
