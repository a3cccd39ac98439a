use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid risk limit: {0}")]
    InvalidLimit(#[from] core_types::CoreError),
}
