//! Typed events and the fan-out bus.
//!
//! Producers (trade recorder, order use-cases, risk monitor, market feeds)
//! publish typed messages; connected client sessions receive them through
//! per-session bounded queues. Neither side knows about the other's crate,
//! which is what breaks the order -> trade -> stats -> websocket cycle.

pub mod bus;
pub mod error;
pub mod messages;

pub use bus::{FanoutBus, SESSION_QUEUE_CAPACITY, SessionId};
pub use error::EventsError;
pub use messages::{BotStatsPayload, OrderbookSnapshot, WsMessage, channels};
