use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use configuration::EngineSettings;
use core_types::Bot;
use database::{BotRepository, ConnectionRepository, StrategyRepository};
use events::FanoutBus;
use keystore::Cipher;
use serde_json::json;
use strategies::{OrderTemplate, StrategyContext, StrategyParams, StrategyRegistry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bot_engine::{BotEngine, EngineConfig, MarketSpec};
use crate::error::EngineError;
use crate::orders::{OrderService, spawn_user_stream_consumer};

/// Process-wide, single-instance registry of running bot engines.
///
/// Start/stop of any bot serialises on the registry lock. `RUNNING` in
/// storage means an engine exists in this process; after a crash, rows may
/// say `RUNNING` with no engine until the status reconciliation job lowers
/// them.
pub struct BotManager {
    engines: Mutex<HashMap<Uuid, BotEngine>>,
    user_streams: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    bots: BotRepository,
    bot_strategies: StrategyRepository,
    connections: ConnectionRepository,
    cipher: Cipher,
    registry: Arc<StrategyRegistry>,
    orders: Arc<OrderService>,
    settings: EngineSettings,
    #[allow(dead_code)]
    bus: Arc<FanoutBus>,
}

impl BotManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bots: BotRepository,
        bot_strategies: StrategyRepository,
        connections: ConnectionRepository,
        cipher: Cipher,
        registry: Arc<StrategyRegistry>,
        orders: Arc<OrderService>,
        settings: EngineSettings,
        bus: Arc<FanoutBus>,
    ) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            user_streams: Mutex::new(HashMap::new()),
            bots,
            bot_strategies,
            connections,
            cipher,
            registry,
            orders,
            settings,
            bus,
        }
    }

    /// Starts a bot: resolves its connection, strategy and configuration,
    /// spins up an engine, and records `RUNNING`. Any failure before the
    /// engine is stored leaves the bot in `ERROR` with the failure message.
    pub async fn start_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let mut engines = self.engines.lock().await;

        // A stale engine under this id gets a best-effort stop first.
        if let Some(stale) = engines.remove(&bot_id) {
            tracing::warn!(bot_id = %bot_id, "Stale engine found, stopping it before restart");
            let _ = stale.stop().await;
        }

        let bot = self
            .bots
            .find_by_id(bot_id)
            .await?
            .ok_or(EngineError::BotNotFound(bot_id))?;

        if !bot.status.can_start() {
            return Err(EngineError::InvalidState(format!(
                "cannot start from {}",
                bot.status.as_str()
            )));
        }

        match self.build_and_start_engine(&bot).await {
            Ok(engine) => {
                engines.insert(bot_id, engine);
                self.bots.mark_running(bot_id).await?;
                tracing::info!(bot_id = %bot_id, name = %bot.name, "Bot started");
                Ok(())
            }
            Err(e) => {
                tracing::error!(bot_id = %bot_id, error = %e, "Failed to start bot");
                if let Err(mark_err) = self.bots.mark_error(bot_id, &e.to_string()).await {
                    tracing::error!(bot_id = %bot_id, error = %mark_err, "Failed to record start failure");
                }
                Err(e)
            }
        }
    }

    async fn build_and_start_engine(&self, bot: &Bot) -> Result<BotEngine, EngineError> {
        let connection = self
            .connections
            .get(bot.connection_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Exchange connection".to_string()))?;
        if connection.is_unsafe() {
            tracing::warn!(
                connection_id = %connection.id,
                "Connection holds withdraw permission; flagged unsafe for bot trading"
            );
        }

        let credentials = self
            .cipher
            .reveal(&connection.secrets, connection.is_testnet)?;
        let exchange = gateway::connect(
            connection.exchange_kind,
            &credentials.api_key,
            &credentials.api_secret,
            connection.is_testnet,
        )?;

        let strategy_row = self
            .bot_strategies
            .find_by_id(bot.strategy_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Strategy".to_string()))?;

        // Merge precedence: strategy defaults <- bot configuration <- the
        // bot's free-form strategy settings.
        let config = &bot.configuration;
        let bot_config_layer = json!({
            "symbol": config.symbol,
            "base_quantity": config.base_quantity.to_string(),
            "quote_quantity": config.quote_quantity.to_string(),
            "take_profit_percentage": config.take_profit_percentage.to_string(),
            "stop_loss_percentage": config.stop_loss_percentage.to_string(),
        });
        let params = StrategyParams::merged(
            &strategy_row.parameters,
            &bot_config_layer,
            &config.strategy_settings,
        );

        let check_interval =
            params.u64("check_interval", self.settings.default_check_interval_secs)
                .map_err(EngineError::Strategy)?;
        let leverage = params.usize("leverage", 1).map_err(EngineError::Strategy)? as u32;
        core_types::position::validate_leverage(leverage)?;

        let orders = self.orders.clone();
        let on_order: strategies::OnOrder = Arc::new(move |order, _ack| {
            let orders = orders.clone();
            Box::pin(async move {
                if let Err(e) = orders.record_strategy_order(&order).await {
                    tracing::error!(order_id = %order.id, error = %e, "Failed to record strategy order");
                }
            })
        });

        let ctx = StrategyContext::new(
            exchange.clone(),
            OrderTemplate {
                user_id: bot.user_id,
                connection_id: bot.connection_id,
                bot_id: bot.id,
                leverage,
                margin_mode: core_types::MarginMode::Isolated,
            },
            on_order,
        );

        let strategy = self.registry.create(&strategy_row.name, &params, ctx)?;
        let market = MarketSpec::for_strategy(strategy.as_ref());

        self.ensure_user_stream(connection.id, exchange.clone()).await;

        Ok(BotEngine::start(
            bot.id,
            config.symbol.clone(),
            strategy,
            exchange,
            Arc::new(self.bots.clone()),
            market,
            EngineConfig {
                check_interval: Duration::from_secs(check_interval),
                stop_grace: self.settings.stop_grace(),
                max_consecutive_errors: self.settings.max_consecutive_errors,
            },
        ))
    }

    /// One user-event stream per connection feeds fills back into the order
    /// and trade path.
    async fn ensure_user_stream(
        &self,
        connection_id: Uuid,
        exchange: Arc<dyn gateway::ExchangeGateway>,
    ) {
        let mut streams = self.user_streams.lock().await;
        streams.retain(|_, handle| !handle.is_finished());
        if !streams.contains_key(&connection_id) {
            let handle = spawn_user_stream_consumer(exchange, self.orders.clone());
            streams.insert(connection_id, handle);
        }
    }

    /// Stops a running bot's engine and records `PAUSED`.
    pub async fn stop_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let mut engines = self.engines.lock().await;
        let engine = engines
            .remove(&bot_id)
            .ok_or(EngineError::NotRunning(bot_id))?;
        drop(engines);

        engine.stop().await;
        self.bots.mark_paused(bot_id).await?;
        tracing::info!(bot_id = %bot_id, "Bot stopped");
        Ok(())
    }

    /// Stops every engine at process shutdown, swallowing per-bot errors.
    /// Storage statuses are left as-is: the manager is single-instance, and
    /// on restart an operator (or the reconciliation job) decides.
    pub async fn stop_all(&self) {
        let mut engines = self.engines.lock().await;
        let drained: Vec<(Uuid, BotEngine)> = engines.drain().collect();
        drop(engines);
        tracing::info!(count = drained.len(), "Stopping all bots");

        for (bot_id, engine) in drained {
            if !engine.stop().await {
                tracing::warn!(bot_id = %bot_id, "Engine did not stop cleanly");
            }
        }

        let mut streams = self.user_streams.lock().await;
        for (_, handle) in streams.drain() {
            handle.abort();
        }
        tracing::info!("All bots stopped");
    }

    pub async fn is_running(&self, bot_id: Uuid) -> bool {
        self.engines.lock().await.contains_key(&bot_id)
    }

    pub async fn running_ids(&self) -> Vec<Uuid> {
        self.engines.lock().await.keys().copied().collect()
    }
}
