//! # Strategy Library
//!
//! The trading logic of the platform. Defines the universal [`Strategy`]
//! contract, the [`StrategyContext`] the engine injects at construction
//! (gateway handle + order callback), and the built-in implementations.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** strategies know nothing about databases or transports.
//!   They see market data and place orders through their context.
//! - **Strategy-agnostic engine:** the execution engine drives any strategy
//!   through the trait; new strategies register in the [`StrategyRegistry`]
//!   under their display name.
//! - **Exclusive ownership:** a strategy instance belongs to exactly one
//!   engine and is never shared across tasks.

pub mod context;
pub mod dca;
pub mod error;
pub mod params;
pub mod registry;
pub mod scalping;
pub mod trend_following;

pub use context::{OnOrder, OrderTemplate, StrategyContext};
pub use dca::Dca;
pub use error::StrategyError;
pub use params::StrategyParams;
pub use registry::StrategyRegistry;
pub use scalping::Scalping;
pub use trend_following::TrendFollowing;

use async_trait::async_trait;
use core_types::{Kline, MarketData, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A discrete trading instruction produced by the synchronous backtest hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub quantity: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    OpenLong,
    OpenShort,
    FlipLong,
    FlipShort,
    Close,
}

/// The core trait all trading strategies implement.
///
/// `on_tick` drives live trading; the optional `calculate_signal` is the
/// synchronous hook a backtesting sibling service runs over historical
/// candles. `&mut self` matters: strategies keep internal indicator state and
/// are not thread-safe.
#[async_trait]
pub trait Strategy: Send {
    /// Unique display name, the registry key.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Timeframes the strategy needs candles for; empty means ticker-driven.
    fn required_timeframes(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Called once per engine tick with the latest market snapshot.
    async fn on_tick(&mut self, data: &MarketData) -> Result<(), StrategyError>;

    /// Synchronous per-candle evaluation for backtests.
    fn calculate_signal(
        &mut self,
        candle: &Kline,
        index: usize,
        position: Option<&Position>,
    ) -> Option<Signal> {
        let _ = (candle, index, position);
        None
    }
}
