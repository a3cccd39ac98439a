use core_types::ErrorKind;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Insufficient balance: need {required} {}, have {available}", crate::QUOTE_ASSET)]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("A position already exists for {0}")]
    PositionExists(String),

    #[error("No open position for {0}")]
    UnknownPosition(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

impl PortfolioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortfolioError::InsufficientBalance { .. } => ErrorKind::Invariant,
            PortfolioError::PositionExists(..) => ErrorKind::Conflict,
            PortfolioError::UnknownPosition(..) => ErrorKind::NotFound,
            PortfolioError::InvalidPosition(..) => ErrorKind::Validation,
        }
    }
}
