use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use core_types::MarketData;
use gateway::ExchangeGateway;
use strategies::{Strategy, StrategyError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Where the tick loop reports bot errors. The production implementation
/// writes the bot row; tests observe it directly.
#[async_trait]
pub trait BotStatusSink: Send + Sync {
    /// A transient tick failure: recorded, loop continues.
    async fn record_tick_error(&self, bot_id: Uuid, message: &str);
    /// A fatal failure: the bot transitions to `ERROR` and the loop ends.
    async fn record_fatal(&self, bot_id: Uuid, message: &str);
}

#[async_trait]
impl BotStatusSink for database::BotRepository {
    async fn record_tick_error(&self, bot_id: Uuid, message: &str) {
        if let Err(e) = self.set_last_error(bot_id, message).await {
            tracing::error!(bot_id = %bot_id, error = %e, "Failed to record tick error");
        }
    }

    async fn record_fatal(&self, bot_id: Uuid, message: &str) {
        if let Err(e) = self.mark_error(bot_id, message).await {
            tracing::error!(bot_id = %bot_id, error = %e, "Failed to mark bot errored");
        }
    }
}

/// What market snapshot the engine fetches each tick.
#[derive(Debug, Clone)]
pub enum MarketSpec {
    Ticker,
    Candles { interval: String, limit: u16 },
}

impl MarketSpec {
    /// Candle-driven when the strategy declares timeframes, ticker-driven
    /// otherwise.
    pub fn for_strategy(strategy: &dyn Strategy) -> Self {
        match strategy.required_timeframes().first() {
            Some(interval) => MarketSpec::Candles {
                interval: interval.to_string(),
                limit: 200,
            },
            None => MarketSpec::Ticker,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub check_interval: Duration,
    pub stop_grace: Duration,
    pub max_consecutive_errors: u32,
}

/// One long-lived cooperative task per running bot.
///
/// Each pass fetches the latest market snapshot, hands it to the strategy,
/// then sleeps until the next check interval or the cancellation signal,
/// whichever fires first. Exactly one tick runs at a time; the strategy
/// instance is owned exclusively by the loop.
pub struct BotEngine {
    bot_id: Uuid,
    stop_grace: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BotEngine {
    /// Spawns the tick loop and returns its handle.
    pub fn start(
        bot_id: Uuid,
        symbol: String,
        mut strategy: Box<dyn Strategy>,
        gateway: Arc<dyn ExchangeGateway>,
        status: Arc<dyn BotStatusSink>,
        market: MarketSpec,
        config: EngineConfig,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let stop_grace = config.stop_grace;

        let handle = tokio::spawn(async move {
            tracing::info!(bot_id = %bot_id, symbol = %symbol, "Bot engine started");
            let mut consecutive_errors: u32 = 0;

            loop {
                let tick = Self::tick(&symbol, strategy.as_mut(), &gateway, &market).await;
                match tick {
                    Ok(()) => {
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        let transient = e.is_transient();
                        consecutive_errors += 1;
                        tracing::warn!(
                            bot_id = %bot_id,
                            error = %e,
                            consecutive_errors,
                            transient,
                            "Tick failed"
                        );
                        if !transient || consecutive_errors >= config.max_consecutive_errors {
                            let message = if transient {
                                format!(
                                    "{} (failed {} consecutive ticks)",
                                    e, consecutive_errors
                                )
                            } else {
                                e.to_string()
                            };
                            status.record_fatal(bot_id, &message).await;
                            tracing::error!(bot_id = %bot_id, "Bot engine stopping after fatal error");
                            return;
                        }
                        status.record_tick_error(bot_id, &e.to_string()).await;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(config.check_interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(bot_id = %bot_id, "Bot engine drained");
        });

        Self {
            bot_id,
            stop_grace,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn tick(
        symbol: &str,
        strategy: &mut dyn Strategy,
        gateway: &Arc<dyn ExchangeGateway>,
        market: &MarketSpec,
    ) -> Result<(), StrategyError> {
        let snapshot = match market {
            MarketSpec::Ticker => MarketData::Ticker(gateway.get_ticker(symbol).await?),
            MarketSpec::Candles { interval, limit } => MarketData::Candles(
                gateway.get_recent_candles(symbol, interval, *limit).await?,
            ),
        };
        strategy.on_tick(&snapshot).await
    }

    /// Signals the loop and waits up to the grace period for it to drain.
    /// A loop that fails to yield is logged and left behind, never aborted.
    pub async fn stop(&self) -> bool {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("engine lock poisoned").take();
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(self.stop_grace, handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    bot_id = %self.bot_id,
                    grace_secs = self.stop_grace.as_secs(),
                    "Engine did not acknowledge stop within the grace period"
                );
                false
            }
        }
    }

    pub fn bot_id(&self) -> Uuid {
        self.bot_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::{Kline, Order, OrderStatus, Ticker};
    use gateway::{
        AccountSnapshot, GatewayError, MarketEvent, OrderAck, OrderStatusReport, UserEvent,
    };
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct CountingStrategy {
        ticks: Arc<AtomicU32>,
        fail_with: Option<fn() -> StrategyError>,
    }

    #[async_trait]
    impl Strategy for CountingStrategy {
        fn name(&self) -> &'static str {
            "Counting"
        }
        fn description(&self) -> &'static str {
            "test strategy"
        }
        async fn on_tick(&mut self, _data: &MarketData) -> Result<(), StrategyError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    struct TickerGateway;

    #[async_trait]
    impl gateway::ExchangeGateway for TickerGateway {
        async fn place_order(&self, _order: &Order) -> Result<OrderAck, GatewayError> {
            Err(GatewayError::BadRequest("not used".into()))
        }
        async fn cancel_order(
            &self,
            _symbol: &str,
            _id: &str,
        ) -> Result<OrderStatusReport, GatewayError> {
            Err(GatewayError::NotFound("not used".into()))
        }
        async fn get_order(
            &self,
            _symbol: &str,
            _id: &str,
        ) -> Result<OrderStatusReport, GatewayError> {
            Err(GatewayError::NotFound("not used".into()))
        }
        async fn list_open_orders(
            &self,
            _symbol: Option<&str>,
        ) -> Result<Vec<OrderStatusReport>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_account(&self) -> Result<AccountSnapshot, GatewayError> {
            Ok(AccountSnapshot {
                balances: Vec::new(),
                can_trade: true,
            })
        }
        async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
            Ok(Ticker {
                symbol: symbol.to_string(),
                price: Decimal::from(100),
                timestamp: chrono::Utc::now(),
            })
        }
        async fn get_recent_candles(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u16,
        ) -> Result<Vec<Kline>, GatewayError> {
            Ok(Vec::new())
        }
        async fn test_connectivity(&self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn stream_user_events(&self) -> Result<mpsc::Receiver<UserEvent>, GatewayError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn stream_market_events(
            &self,
            _symbols: &[String],
            _interval: &str,
        ) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn close(&self) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        tick_errors: AtomicU32,
        fatals: AtomicU32,
    }

    #[async_trait]
    impl BotStatusSink for RecordingSink {
        async fn record_tick_error(&self, _bot_id: Uuid, _message: &str) {
            self.tick_errors.fetch_add(1, Ordering::SeqCst);
        }
        async fn record_fatal(&self, _bot_id: Uuid, _message: &str) {
            self.fatals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            check_interval: Duration::from_millis(10),
            stop_grace: Duration::from_secs(1),
            max_consecutive_errors: 3,
        }
    }

    #[tokio::test]
    async fn ticks_until_stopped_and_acknowledges_stop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let engine = BotEngine::start(
            Uuid::new_v4(),
            "BTCUSDT".to_string(),
            Box::new(CountingStrategy {
                ticks: ticks.clone(),
                fail_with: None,
            }),
            Arc::new(TickerGateway),
            Arc::new(RecordingSink::default()),
            MarketSpec::Ticker,
            config(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.stop().await);
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected multiple ticks, saw {}", seen);

        // The loop is gone: no further ticks accumulate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn transient_errors_skip_the_tick_until_the_cap() {
        let ticks = Arc::new(AtomicU32::new(0));
        let sink = Arc::new(RecordingSink::default());
        let engine = BotEngine::start(
            Uuid::new_v4(),
            "BTCUSDT".to_string(),
            Box::new(CountingStrategy {
                ticks: ticks.clone(),
                fail_with: Some(|| {
                    StrategyError::Gateway(GatewayError::Connectivity("timeout".into()))
                }),
            }),
            Arc::new(TickerGateway),
            sink.clone(),
            MarketSpec::Ticker,
            config(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        // Three consecutive transient failures hit the cap and become fatal.
        assert_eq!(sink.fatals.load(Ordering::SeqCst), 1);
        assert_eq!(sink.tick_errors.load(Ordering::SeqCst), 2);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        engine.stop().await;
    }

    #[tokio::test]
    async fn fatal_error_stops_the_loop_immediately() {
        let ticks = Arc::new(AtomicU32::new(0));
        let sink = Arc::new(RecordingSink::default());
        let engine = BotEngine::start(
            Uuid::new_v4(),
            "BTCUSDT".to_string(),
            Box::new(CountingStrategy {
                ticks: ticks.clone(),
                fail_with: Some(|| StrategyError::Gateway(GatewayError::Auth("bad key".into()))),
            }),
            Arc::new(TickerGateway),
            sink.clone(),
            MarketSpec::Ticker,
            config(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(sink.fatals.load(Ordering::SeqCst), 1);
        assert_eq!(sink.tick_errors.load(Ordering::SeqCst), 0);
        engine.stop().await;
    }
}
