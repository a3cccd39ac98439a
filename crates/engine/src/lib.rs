//! # Bot Orchestration & Execution Core
//!
//! The process-wide [`BotManager`] owns one [`BotEngine`] per running bot.
//! Each engine drives its strategy on a fixed check interval against live
//! market data; strategy orders route through the gateway and are recorded
//! via the order use-cases, which also own cancel-and-replace and the
//! fill-to-trade path. Reconciliation job handlers repair drift between
//! local state and the exchange's authoritative view.

pub mod bot_engine;
pub mod error;
pub mod manager;
pub mod orders;
pub mod reconcile;

pub use bot_engine::{BotEngine, BotStatusSink, EngineConfig, MarketSpec};
pub use error::EngineError;
pub use manager::BotManager;
pub use orders::OrderService;
pub use reconcile::{ReconcileDeps, register_handlers};
