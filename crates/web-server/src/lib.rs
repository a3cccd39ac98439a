//! HTTP and WebSocket surface of the platform.
//!
//! Routing, authentication and request/response shapes live here; behaviour
//! lives in the engine, repositories and monitors this crate calls into.
//! Transport status codes are derived from the shared error taxonomy.

pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use database::{
    BotRepository, ConnectionRepository, OrderRepository, RiskRepository, StrategyRepository,
    TradeRepository, UserRepository,
};
use engine::{BotManager, OrderService};
use events::FanoutBus;
use jobs::{JobQueue, JobScheduler};
use keystore::Cipher;
use risk::RiskMonitor;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::JwtKeys;

/// The shared application state all handlers can access.
pub struct AppState {
    pub users: UserRepository,
    pub connections: ConnectionRepository,
    pub strategies: StrategyRepository,
    pub bots: BotRepository,
    pub orders: OrderRepository,
    pub trades: TradeRepository,
    pub risk_limits: RiskRepository,
    pub cipher: Cipher,
    pub jwt: JwtKeys,
    pub manager: Arc<BotManager>,
    pub order_service: Arc<OrderService>,
    pub bus: Arc<FanoutBus>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub job_queue: Arc<JobQueue>,
    pub scheduler: Arc<JobScheduler>,
}

/// Builds the application router over the assembled state.
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        // --- Auth ---
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        // --- Exchange connections ---
        .route(
            "/exchanges/connections",
            post(handlers::connections::create).get(handlers::connections::list),
        )
        .route(
            "/exchanges/connections/:id",
            get(handlers::connections::get_one)
                .patch(handlers::connections::update)
                .delete(handlers::connections::remove),
        )
        .route(
            "/exchanges/connections/:id/test",
            post(handlers::connections::test),
        )
        // --- Orders ---
        .route(
            "/orders",
            post(handlers::orders::create).get(handlers::orders::list),
        )
        .route(
            "/orders/:id",
            get(handlers::orders::get_one)
                .patch(handlers::orders::modify)
                .delete(handlers::orders::cancel),
        )
        // --- Bots ---
        .route("/bots", post(handlers::bots::create).get(handlers::bots::list))
        .route(
            "/bots/:id",
            get(handlers::bots::get_one)
                .patch(handlers::bots::update)
                .delete(handlers::bots::remove),
        )
        .route("/bots/:id/start", post(handlers::bots::start))
        .route("/bots/:id/resume", post(handlers::bots::start))
        .route("/bots/:id/stop", post(handlers::bots::stop))
        .route("/bots/:id/pause", post(handlers::bots::stop))
        // --- Strategies ---
        .route("/strategies", get(handlers::bots::list_strategies))
        // --- Risk ---
        .route(
            "/risk/limits",
            post(handlers::risk::create_limit).get(handlers::risk::list_limits),
        )
        .route(
            "/risk/limits/:id",
            patch(handlers::risk::update_limit).delete(handlers::risk::delete_limit),
        )
        .route("/risk/alerts", get(handlers::risk::list_alerts))
        .route(
            "/risk/alerts/:id/acknowledge",
            post(handlers::risk::acknowledge_alert),
        )
        .route("/risk/monitor", post(handlers::risk::monitor))
        // --- Jobs ---
        .route("/jobs/stats", get(handlers::jobs::stats))
        .route("/jobs/dlq", get(handlers::jobs::dead_letter).delete(handlers::jobs::clear_dead_letter))
        .route("/jobs/dlq/:id/retry", post(handlers::jobs::retry_dead_letter))
        .route("/jobs/scheduler/tasks", get(handlers::jobs::scheduler_tasks))
        .route(
            "/jobs/:id",
            get(handlers::jobs::get_one).delete(handlers::jobs::cancel),
        )
        // --- Live sessions ---
        .route("/ws", get(handlers::ws::upgrade))
        .with_state(state)
        .layer(cors)
}

/// Binds and serves until the shutdown future resolves.
pub async fn run_server(
    state: Arc<AppState>,
    bind_address: &str,
    cors_origins: &[String],
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state, cors_origins);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = bind_address, "Web server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
