use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// The root settings structure for the entire application.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub engine: EngineSettings,
    pub jobs: JobSettings,
    /// Fernet key used by the credential store. Startup fails without it.
    pub encryption_key: String,
    pub cors_origins: Vec<String>,
    pub bind_address: String,
    /// Symbols the public market feed streams to connected sessions. Empty
    /// disables the feed.
    pub market_symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub pool_overflow: u32,
    pub log_queries: bool,
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
}

/// Tunables for the per-bot execution engines.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Default seconds between strategy ticks when a bot does not override it.
    pub default_check_interval_secs: u64,
    /// How long `Stop` waits for a tick loop to acknowledge cancellation.
    pub stop_grace_secs: u64,
    /// Consecutive gateway errors before the engine marks the bot `ERROR`.
    pub max_consecutive_errors: u32,
}

impl EngineSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub worker_count: usize,
    pub max_concurrent_per_worker: usize,
    /// Seconds a worker sleeps when the queues are empty.
    pub poll_interval_secs: f64,
    /// Seconds between scheduler sweeps over the task registry.
    pub scheduler_check_interval_secs: u64,
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVariable(name.to_string()))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string(), value))
}

impl Settings {
    /// Reads every recognised option from the environment. A `.env` file, if
    /// present, is loaded first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database = DatabaseSettings {
            url: required("DATABASE_URL")?,
            max_connections: parse("DATABASE_MAX_CONNECTIONS", optional("DATABASE_MAX_CONNECTIONS", "10"))?,
            pool_overflow: parse("DATABASE_POOL_OVERFLOW", optional("DATABASE_POOL_OVERFLOW", "5"))?,
            log_queries: parse("DATABASE_LOG_QUERIES", optional("DATABASE_LOG_QUERIES", "false"))?,
        };

        let jwt = JwtSettings {
            secret: optional("JWT_SECRET_KEY", "dev-jwt-secret-change-in-production"),
            algorithm: optional("JWT_ALGORITHM", "HS256"),
            access_token_expire_minutes: parse(
                "JWT_ACCESS_TOKEN_EXPIRE_MINUTES",
                optional("JWT_ACCESS_TOKEN_EXPIRE_MINUTES", "30"),
            )?,
            refresh_token_expire_days: parse(
                "JWT_REFRESH_TOKEN_EXPIRE_DAYS",
                optional("JWT_REFRESH_TOKEN_EXPIRE_DAYS", "7"),
            )?,
        };

        let engine = EngineSettings {
            default_check_interval_secs: parse(
                "ENGINE_CHECK_INTERVAL_SECS",
                optional("ENGINE_CHECK_INTERVAL_SECS", "10"),
            )?,
            stop_grace_secs: parse("ENGINE_STOP_GRACE_SECS", optional("ENGINE_STOP_GRACE_SECS", "10"))?,
            max_consecutive_errors: parse(
                "ENGINE_MAX_CONSECUTIVE_ERRORS",
                optional("ENGINE_MAX_CONSECUTIVE_ERRORS", "5"),
            )?,
        };

        let jobs = JobSettings {
            worker_count: parse("JOB_WORKER_COUNT", optional("JOB_WORKER_COUNT", "3"))?,
            max_concurrent_per_worker: parse(
                "JOB_MAX_CONCURRENT_PER_WORKER",
                optional("JOB_MAX_CONCURRENT_PER_WORKER", "1"),
            )?,
            poll_interval_secs: parse("JOB_POLL_INTERVAL_SECS", optional("JOB_POLL_INTERVAL_SECS", "1.0"))?,
            scheduler_check_interval_secs: parse(
                "SCHEDULER_CHECK_INTERVAL_SECS",
                optional("SCHEDULER_CHECK_INTERVAL_SECS", "30"),
            )?,
        };

        let encryption_key = required("ENCRYPTION_KEY")?;

        let cors_origins = optional("CORS_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let market_symbols = optional("MARKET_SYMBOLS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .collect();

        Ok(Settings {
            database,
            jwt,
            engine,
            jobs,
            encryption_key,
            cors_origins,
            bind_address: optional("BIND_ADDRESS", "0.0.0.0:8000"),
            market_symbols,
        })
    }
}
