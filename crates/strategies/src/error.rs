use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] gateway::GatewayError),

    #[error("Order error: {0}")]
    Order(#[from] core_types::CoreError),

    #[error("Strategy needs {0} but the snapshot did not include it")]
    MissingMarketData(&'static str),
}

impl StrategyError {
    /// Whether the engine should treat a tick failure as transient (skip the
    /// tick, keep the loop) rather than fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            StrategyError::Gateway(e) => e.is_transient(),
            StrategyError::MissingMarketData(_) => true,
            _ => false,
        }
    }
}
