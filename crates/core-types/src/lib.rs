pub mod bot;
pub mod enums;
pub mod error;
pub mod market;
pub mod order;
pub mod position;
pub mod risk;
pub mod trade;

// Re-export the core types to provide a clean public API.
pub use bot::{Bot, BotConfiguration, BotStats};
pub use enums::{
    BotStatus, ConnectionStatus, ExchangeKind, MarginMode, OrderSide, OrderStatus, OrderType,
    PositionSide, PositionStatus, RiskLimitKind, RiskSeverity, TimeInForce, WorkingType,
};
pub use error::{CoreError, ErrorKind};
pub use market::{Kline, MarketData, Ticker};
pub use order::{Order, OrderExecution};
pub use position::Position;
pub use risk::{LimitViolation, RiskAlert, RiskLimit, RiskMetrics};
pub use trade::Trade;
