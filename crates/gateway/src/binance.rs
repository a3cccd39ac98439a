use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use core_types::{Kline, Order, OrderType, PositionSide, Ticker};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::auth::sign_request;
use crate::error::GatewayError;
use crate::responses::{
    AccountBalance, AccountSnapshot, ApiErrorResponse, MarketEvent, OrderAck, OrderStatusReport,
    RawBalance, RawKline, RawOrder, RawTicker, UserEvent, parse_decimal,
};
use crate::stream;
use crate::{ExchangeGateway, timestamp_millis};

const MAINNET_BASE_URL: &str = "https://fapi.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
const MAINNET_WS_URL: &str = "wss://fstream.binance.com";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// Default timeout for data requests; auth/ping calls use the shorter one.
const DATA_TIMEOUT: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// The concrete gateway for Binance USDⓈ-M futures.
#[derive(Clone)]
pub struct BinanceFutures {
    client: reqwest::Client,
    base_url: String,
    ws_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceFutures {
    pub fn new(api_key: &str, api_secret: &str, is_testnet: bool) -> Result<Self, GatewayError> {
        let (base_url, ws_url) = if is_testnet {
            (TESTNET_BASE_URL, TESTNET_WS_URL)
        } else {
            (MAINNET_BASE_URL, MAINNET_WS_URL)
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(api_key)
                .map_err(|_| GatewayError::Auth("API key contains invalid characters".into()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DATA_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            ws_url: ws_url.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    fn signed_url(&self, path: &str, params: &mut BTreeMap<&str, String>) -> Result<String, GatewayError> {
        params.insert("timestamp", timestamp_millis(Utc::now()).to_string());
        let query_string = serde_qs::to_string(params)
            .map_err(|e| GatewayError::Deserialization(e.to_string()))?;
        let signature = sign_request(&self.api_secret, &query_string);
        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, GatewayError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.get(&url).send().await?;
        handle_response(response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, GatewayError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.post(&url).send().await?;
        handle_response(response).await
    }

    async fn delete_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, GatewayError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.delete(&url).send().await?;
        handle_response(response).await
    }

    pub(crate) fn listen_key_request(&self) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/fapi/v1/listenKey", self.base_url))
            .timeout(PING_TIMEOUT)
    }

    pub(crate) fn listen_key_keepalive(&self) -> reqwest::RequestBuilder {
        self.client
            .put(format!("{}/fapi/v1/listenKey", self.base_url))
            .timeout(PING_TIMEOUT)
    }
}

async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let text = response.text().await?;

    if status.is_success() {
        return serde_json::from_str::<T>(&text)
            .map_err(|e| GatewayError::Deserialization(e.to_string()));
    }

    let (code, msg) = match serde_json::from_str::<ApiErrorResponse>(&text) {
        Ok(api_error) => (api_error.code, api_error.msg),
        Err(_) => (0, text),
    };
    Err(map_exchange_error(status, code, msg, retry_after))
}

/// Maps HTTP status + exchange error code onto the gateway taxonomy.
fn map_exchange_error(
    status: reqwest::StatusCode,
    code: i64,
    msg: String,
    retry_after_secs: Option<u64>,
) -> GatewayError {
    use reqwest::StatusCode;

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return GatewayError::RateLimit { retry_after_secs };
    }
    if status.is_server_error() {
        return GatewayError::Upstream(format!("{}: {}", code, msg));
    }
    match code {
        // Invalid API key, bad signature, key permissions.
        -1022 | -2014 | -2015 => GatewayError::Auth(msg),
        // Unknown order / order does not exist.
        -2011 | -2013 => GatewayError::NotFound(msg),
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            GatewayError::Auth(msg)
        }
        _ => GatewayError::BadRequest(format!("{}: {}", code, msg)),
    }
}

/// Translates an order into the exchange's parameter vocabulary.
pub(crate) fn order_params(order: &Order) -> BTreeMap<&'static str, String> {
    let mut params = BTreeMap::new();
    params.insert("symbol", order.symbol.clone());
    params.insert("side", order.side.as_str().to_string());
    let order_type = match order.order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::StopMarket => "STOP_MARKET",
        OrderType::StopLimit => "STOP",
        OrderType::TakeProfit => "TAKE_PROFIT_MARKET",
        OrderType::TrailingStop => "TRAILING_STOP_MARKET",
    };
    params.insert("type", order_type.to_string());
    params.insert("newClientOrderId", order.client_order_id.clone());
    let position_side = match order.position_side {
        PositionSide::Both => "BOTH",
        PositionSide::Long => "LONG",
        PositionSide::Short => "SHORT",
    };
    params.insert("positionSide", position_side.to_string());

    if order.close_position {
        params.insert("closePosition", "true".to_string());
    } else {
        params.insert("quantity", order.quantity.normalize().to_string());
        if order.reduce_only {
            params.insert("reduceOnly", "true".to_string());
        }
    }

    if let Some(price) = order.price {
        params.insert("price", price.normalize().to_string());
        params.insert("timeInForce", time_in_force_param(order).to_string());
    }
    if let Some(stop_price) = order.stop_price {
        params.insert("stopPrice", stop_price.normalize().to_string());
        let working_type = match order.working_type {
            core_types::WorkingType::MarkPrice => "MARK_PRICE",
            core_types::WorkingType::ContractPrice => "CONTRACT_PRICE",
        };
        params.insert("workingType", working_type.to_string());
    }
    if let Some(callback_rate) = order.callback_rate {
        params.insert("callbackRate", callback_rate.normalize().to_string());
    }
    params
}

fn time_in_force_param(order: &Order) -> &'static str {
    match order.time_in_force {
        core_types::TimeInForce::Gtc => "GTC",
        core_types::TimeInForce::Ioc => "IOC",
        core_types::TimeInForce::Fok => "FOK",
        core_types::TimeInForce::Gtx => "GTX",
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFutures {
    async fn place_order(&self, order: &Order) -> Result<OrderAck, GatewayError> {
        let mut params = order_params(order);
        let raw: RawOrder = self.post_signed("/fapi/v1/order", &mut params).await?;
        raw.into_ack()
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderStatusReport, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", exchange_order_id.to_string());
        let raw: RawOrder = self.delete_signed("/fapi/v1/order", &mut params).await?;
        raw.into_report()
    }

    async fn get_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderStatusReport, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", exchange_order_id.to_string());
        let raw: RawOrder = self.get_signed("/fapi/v1/order", &mut params).await?;
        raw.into_report()
    }

    async fn list_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderStatusReport>, GatewayError> {
        let mut params = BTreeMap::new();
        if let Some(symbol) = symbol {
            params.insert("symbol", symbol.to_string());
        }
        let raw: Vec<RawOrder> = self.get_signed("/fapi/v1/openOrders", &mut params).await?;
        raw.into_iter().map(RawOrder::into_report).collect()
    }

    async fn get_account(&self) -> Result<AccountSnapshot, GatewayError> {
        let mut params = BTreeMap::new();
        let raw: Vec<RawBalance> = self.get_signed("/fapi/v2/balance", &mut params).await?;
        let balances = raw
            .into_iter()
            .map(|b| {
                Ok(AccountBalance {
                    balance: parse_decimal("balance", &b.balance)?,
                    available: parse_decimal("availableBalance", &b.available_balance)?,
                    asset: b.asset,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;
        Ok(AccountSnapshot {
            balances,
            can_trade: true,
        })
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;
        let raw: RawTicker = handle_response(response).await?;
        Ok(Ticker {
            price: parse_decimal("price", &raw.price)?,
            symbol: raw.symbol,
            timestamp: Utc::now(),
        })
    }

    async fn get_recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, GatewayError> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?;
        let raw: Vec<RawKline> = handle_response(response).await?;

        raw.into_iter()
            .map(|k| {
                Ok(Kline {
                    open_time: Utc.timestamp_millis_opt(k.0).single().ok_or_else(|| {
                        GatewayError::Deserialization(format!("invalid open_time: {}", k.0))
                    })?,
                    open: parse_decimal("open", &k.1)?,
                    high: parse_decimal("high", &k.2)?,
                    low: parse_decimal("low", &k.3)?,
                    close: parse_decimal("close", &k.4)?,
                    volume: parse_decimal("volume", &k.5)?,
                    close_time: Utc.timestamp_millis_opt(k.6).single().ok_or_else(|| {
                        GatewayError::Deserialization(format!("invalid close_time: {}", k.6))
                    })?,
                    interval: interval.to_string(),
                })
            })
            .collect()
    }

    async fn test_connectivity(&self) -> Result<(), GatewayError> {
        let url = format!("{}/fapi/v1/ping", self.base_url);
        let response = self.client.get(&url).timeout(PING_TIMEOUT).send().await?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }

    async fn stream_user_events(&self) -> Result<mpsc::Receiver<UserEvent>, GatewayError> {
        stream::spawn_user_stream(self.clone()).await
    }

    async fn stream_market_events(
        &self,
        symbols: &[String],
        interval: &str,
    ) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
        stream::spawn_market_stream(&self.ws_url, symbols, interval)
    }

    async fn close(&self) {
        // reqwest pools connections internally; dropping the client releases
        // them. Nothing else to tear down for REST.
    }
}

pub(crate) fn ws_url(gateway: &BinanceFutures) -> &str {
    &gateway.ws_url
}

/// Market data is public; no credentials involved.
pub(crate) fn public_market_stream(
    symbols: &[String],
    interval: &str,
    is_testnet: bool,
) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
    let ws = if is_testnet { TESTNET_WS_URL } else { MAINNET_WS_URL };
    stream::spawn_market_stream(ws, symbols, interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{MarginMode, OrderSide, TimeInForce, order::NewOrder};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn base_params() -> NewOrder {
        NewOrder {
            user_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            bot_id: None,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.5),
            position_side: PositionSide::Both,
            reduce_only: false,
            leverage: 10,
            margin_mode: MarginMode::Isolated,
        }
    }

    #[test]
    fn market_order_params_carry_idempotency_key() {
        let order = Order::market(base_params()).unwrap();
        let params = order_params(&order);
        assert_eq!(params["type"], "MARKET");
        assert_eq!(params["quantity"], "0.5");
        assert_eq!(params["newClientOrderId"], order.client_order_id);
        assert!(!params.contains_key("price"));
    }

    #[test]
    fn limit_order_params_include_price_and_tif() {
        let order = Order::limit(base_params(), dec!(50000), TimeInForce::Gtx).unwrap();
        let params = order_params(&order);
        assert_eq!(params["type"], "LIMIT");
        assert_eq!(params["price"], "50000");
        assert_eq!(params["timeInForce"], "GTX");
    }

    #[test]
    fn stop_market_params_include_trigger() {
        let order = Order::stop_market(
            base_params(),
            dec!(48000),
            core_types::WorkingType::MarkPrice,
        )
        .unwrap();
        let params = order_params(&order);
        assert_eq!(params["type"], "STOP_MARKET");
        assert_eq!(params["stopPrice"], "48000");
        assert_eq!(params["workingType"], "MARK_PRICE");
    }

    #[test]
    fn rate_limit_and_auth_errors_classified() {
        let err = map_exchange_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            -1003,
            "too many requests".into(),
            Some(30),
        );
        assert!(matches!(
            err,
            GatewayError::RateLimit {
                retry_after_secs: Some(30)
            }
        ));
        assert!(err.is_transient());

        let err = map_exchange_error(
            reqwest::StatusCode::BAD_REQUEST,
            -2014,
            "bad api key".into(),
            None,
        );
        assert!(matches!(err, GatewayError::Auth(_)));
        assert!(!err.is_transient());

        let err = map_exchange_error(
            reqwest::StatusCode::BAD_REQUEST,
            -2011,
            "unknown order".into(),
            None,
        );
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
