//! Durable storage for the platform.
//!
//! One repository per aggregate, all sharing a single `PgPool`. Repositories
//! encapsulate the SQL; callers only see entity types. The one multi-table
//! transaction in the system (trade insert plus bot stats recompute) lives
//! in [`trades::TradeRepository`].

pub mod bots;
pub mod connection;
pub mod connections;
pub mod error;
mod map;
pub mod orders;
pub mod positions;
pub mod risk;
pub mod strategies;
pub mod trades;
pub mod users;

pub use bots::BotRepository;
pub use connection::{connect, run_migrations};
pub use connections::{Connection, ConnectionRepository, NewConnection};
pub use error::DbError;
pub use orders::{OrderFilter, OrderRepository};
pub use positions::PositionRepository;
pub use risk::RiskRepository;
pub use strategies::{Strategy, StrategyRepository};
pub use trades::{RecordOutcome, TradeRepository};
pub use users::{User, UserRepository};

pub type DbPool = sqlx::PgPool;
