//! # Exchange Gateway
//!
//! The abstract adapter between the execution core and one upstream
//! derivatives exchange. The `ExchangeGateway` trait is the contract the
//! engines and order use-cases program against; `BinanceFutures` is the
//! concrete adapter, and tests swap in fakes.
//!
//! Signed-request mechanics (HMAC of the sorted parameter string plus a
//! timestamp) are internal to each adapter. Base URL selection is driven by
//! the connection's testnet flag. Every operation carries a bounded timeout.

mod auth;
pub mod binance;
pub mod error;
pub mod responses;
mod stream;

pub use binance::BinanceFutures;
pub use error::GatewayError;
pub use responses::{
    AccountBalance, AccountSnapshot, FillEvent, MarketEvent, OrderAck, OrderStatusReport,
    UserEvent,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ExchangeKind, Kline, Order, Ticker};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The generic, abstract interface to one trading exchange.
///
/// All methods are bounded: REST calls time out (10 s for auth/ping, 30 s for
/// data), and the stream constructors hand back channels fed by background
/// tasks that reconnect on their own.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Places a new order. The order's `client_order_id` is always forwarded
    /// as the upstream idempotency key.
    async fn place_order(&self, order: &Order) -> Result<OrderAck, GatewayError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderStatusReport, GatewayError>;

    async fn get_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderStatusReport, GatewayError>;

    async fn list_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderStatusReport>, GatewayError>;

    async fn get_account(&self) -> Result<AccountSnapshot, GatewayError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;

    async fn get_recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, GatewayError>;

    /// A cheap authenticated ping used by the connection test endpoint.
    async fn test_connectivity(&self) -> Result<(), GatewayError>;

    /// Streams account events (fills, order updates). The receiver closes
    /// when the gateway is closed.
    async fn stream_user_events(&self) -> Result<mpsc::Receiver<UserEvent>, GatewayError>;

    /// Streams market events (tickers, closed klines) for the given symbols.
    async fn stream_market_events(
        &self,
        symbols: &[String],
        interval: &str,
    ) -> Result<mpsc::Receiver<MarketEvent>, GatewayError>;

    /// Releases held connections. Further calls may fail.
    async fn close(&self);
}

/// Constructs a gateway for the given exchange kind and decrypted key pair.
pub fn connect(
    kind: ExchangeKind,
    api_key: &str,
    api_secret: &str,
    is_testnet: bool,
) -> Result<Arc<dyn ExchangeGateway>, GatewayError> {
    match kind {
        ExchangeKind::Binance => Ok(Arc::new(BinanceFutures::new(
            api_key, api_secret, is_testnet,
        )?)),
        other => Err(GatewayError::Unsupported(other.as_str().to_string())),
    }
}

/// Opens an unauthenticated market stream for the given exchange kind; the
/// public endpoints need no key pair.
pub fn public_market_stream(
    kind: ExchangeKind,
    symbols: &[String],
    interval: &str,
    is_testnet: bool,
) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
    match kind {
        ExchangeKind::Binance => binance::public_market_stream(symbols, interval, is_testnet),
        other => Err(GatewayError::Unsupported(other.as_str().to_string())),
    }
}

pub(crate) fn timestamp_millis(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}
