//! Process configuration for the platform.
//!
//! Every recognised option is an environment variable (a `.env` file is
//! honoured in development). Settings are read once at startup and passed by
//! reference everywhere else; nothing re-reads the environment later.

pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::{DatabaseSettings, EngineSettings, JobSettings, JwtSettings, Settings};

use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber from `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
