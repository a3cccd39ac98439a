use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use configuration::Settings;
use database::{
    BotRepository, ConnectionRepository, OrderRepository, RiskRepository, StrategyRepository,
    TradeRepository, UserRepository,
};
use engine::{BotManager, OrderService, ReconcileDeps};
use events::FanoutBus;
use jobs::{HandlerRegistry, JobPriority, JobQueue, JobScheduler, ScheduleKind, WorkerPool};
use keystore::Cipher;
use risk::RiskMonitor;
use serde_json::json;
use strategies::StrategyRegistry;
use web_server::{AppState, auth::JwtKeys};

#[derive(Parser)]
#[command(name = "meridian", about = "Multi-tenant automated trading platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full platform: API, bot engines, scheduler and workers.
    Serve,
    /// Run only the out-of-band job workers (no HTTP surface).
    Worker,
    /// Apply database migrations and exit.
    Migrate,
    /// Generate a fresh encryption key for provisioning.
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    configuration::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve(true).await,
        Commands::Worker => serve(false).await,
        Commands::Migrate => migrate().await,
        Commands::GenerateKey => {
            println!("{}", Cipher::generate_key());
            Ok(())
        }
    }
}

async fn migrate() -> Result<()> {
    let settings = Settings::from_env().context("failed to load configuration")?;
    let pool = database::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("database unreachable")?;
    database::run_migrations(&pool).await?;
    tracing::info!("Migrations applied");
    Ok(())
}

async fn serve(with_http: bool) -> Result<()> {
    let settings = Settings::from_env().context("failed to load configuration")?;
    let cipher = Cipher::new(&settings.encryption_key)
        .context("ENCRYPTION_KEY is not a valid Fernet key")?;

    // --- Storage ---
    let pool = database::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("database unreachable")?;
    database::run_migrations(&pool).await?;

    let users = UserRepository::new(pool.clone());
    let connections = ConnectionRepository::new(pool.clone());
    let strategy_rows = StrategyRepository::new(pool.clone());
    let bots = BotRepository::new(pool.clone());
    let orders = OrderRepository::new(pool.clone());
    let trades = TradeRepository::new(pool.clone());
    let risk_limits = RiskRepository::new(pool.clone());

    seed_builtin_strategies(&strategy_rows).await?;

    // --- Core components ---
    let bus = Arc::new(FanoutBus::new());
    let registry = Arc::new(StrategyRegistry::with_builtins());
    let order_service = Arc::new(OrderService::new(
        orders.clone(),
        trades.clone(),
        connections.clone(),
        cipher.clone(),
        bus.clone(),
    ));
    let manager = Arc::new(BotManager::new(
        bots.clone(),
        strategy_rows.clone(),
        connections.clone(),
        cipher.clone(),
        registry,
        order_service.clone(),
        settings.engine.clone(),
        bus.clone(),
    ));

    // --- Job system ---
    let job_queue = Arc::new(JobQueue::new());
    let mut handlers = HandlerRegistry::new();
    engine::register_handlers(&mut handlers, ReconcileDeps {
        orders: orders.clone(),
        trades: trades.clone(),
        bots: bots.clone(),
        connections: connections.clone(),
        cipher: cipher.clone(),
        manager: manager.clone(),
    });
    let handlers = Arc::new(handlers);

    let worker_pool = WorkerPool::new(
        settings.jobs.worker_count,
        job_queue.clone(),
        handlers,
        Duration::from_secs_f64(settings.jobs.poll_interval_secs),
        settings.jobs.max_concurrent_per_worker,
    );
    worker_pool.start();

    let scheduler = Arc::new(JobScheduler::new(
        job_queue.clone(),
        Duration::from_secs(settings.jobs.scheduler_check_interval_secs),
    ));
    register_scheduled_tasks(&scheduler)?;
    scheduler.start();

    spawn_market_feed(&settings.market_symbols, bus.clone())?;

    // --- HTTP surface ---
    let state = Arc::new(AppState {
        users,
        connections,
        strategies: strategy_rows,
        bots,
        orders,
        trades,
        risk_limits,
        cipher,
        jwt: JwtKeys::new(&settings.jwt).map_err(|e| anyhow::anyhow!(e.message))?,
        manager: manager.clone(),
        order_service,
        bus,
        risk_monitor: Arc::new(RiskMonitor::new()),
        job_queue: job_queue.clone(),
        scheduler: scheduler.clone(),
    });

    if with_http {
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        };
        web_server::run_server(
            state,
            &settings.bind_address,
            &settings.cors_origins,
            shutdown,
        )
        .await?;
    } else {
        tracing::info!("Worker process running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
    }

    // --- Orderly shutdown ---
    manager.stop_all().await;
    scheduler.stop();
    worker_pool.stop(true).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Makes sure every built-in strategy has a selectable row with its default
/// parameters.
async fn seed_builtin_strategies(repo: &StrategyRepository) -> Result<()> {
    repo.seed_builtin("Scalping", "builtin", json!({"ema_fast": 5, "ema_slow": 13}))
        .await?;
    repo.seed_builtin(
        "TrendFollowing",
        "builtin",
        json!({"fast_period": 20, "slow_period": 50, "timeframe": "1h"}),
    )
    .await?;
    repo.seed_builtin("Dca", "builtin", json!({"interval_seconds": 3600}))
        .await?;
    Ok(())
}

/// Streams public market data for the configured symbols onto the fan-out
/// bus, feeding the per-symbol ticker channels.
fn spawn_market_feed(symbols: &[String], bus: Arc<FanoutBus>) -> Result<()> {
    if symbols.is_empty() {
        return Ok(());
    }
    let mut stream = gateway::public_market_stream(
        core_types::ExchangeKind::Binance,
        symbols,
        "1m",
        false,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            if let gateway::MarketEvent::Ticker(ticker) = event {
                let channel = events::channels::ticker(&ticker.symbol);
                bus.publish_market(&channel, events::WsMessage::Ticker(ticker));
            }
        }
        tracing::warn!("Market feed stream closed");
    });
    Ok(())
}

fn register_scheduled_tasks(scheduler: &JobScheduler) -> Result<()> {
    // Repairs drift between local order state and the exchange.
    scheduler.register(
        "order-reconciliation",
        "reconcile_orders",
        json!({}),
        JobPriority::High,
        ScheduleKind::Interval { seconds: 300 },
        true,
    );
    // Lowers RUNNING rows orphaned by a crash back to PAUSED.
    scheduler.register(
        "bot-status-reconciliation",
        "reconcile_bot_status",
        json!({}),
        JobPriority::Normal,
        ScheduleKind::Interval { seconds: 600 },
        true,
    );
    // Nightly self-healing recompute of every bot's cumulative stats.
    let nightly = jobs::CronExpr::parse("0 3 * * *").map_err(|e| anyhow::anyhow!(e.to_string()))?;
    scheduler.register(
        "nightly-stats-refresh",
        "refresh_bot_stats",
        json!({}),
        JobPriority::Low,
        ScheduleKind::Cron(nightly),
        true,
    );
    Ok(())
}
