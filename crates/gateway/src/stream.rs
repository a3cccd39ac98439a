use chrono::{TimeZone, Utc};
use core_types::{Kline, OrderSide, Ticker};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::binance::{BinanceFutures, ws_url};
use crate::error::GatewayError;
use crate::responses::{FillEvent, MarketEvent, OrderStatusReport, UserEvent, parse_status};

const RECONNECT_DELAY_SECS: u64 = 5;
/// Listen keys expire after 60 minutes; keepalive well inside that.
const LISTEN_KEY_KEEPALIVE_SECS: u64 = 1800;

// --- WebSocket deserialization structs ---

#[derive(Debug, Deserialize)]
struct WsStreamWrapper {
    #[allow(dead_code)]
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct WsTickerEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "E")]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct WsOrderTradeUpdate {
    #[serde(rename = "o")]
    order: WsOrderUpdate,
}

#[derive(Debug, Deserialize)]
struct WsOrderUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "x")]
    execution_type: String,
    #[serde(rename = "X")]
    order_status: String,
    #[serde(rename = "t")]
    trade_id: i64,
    #[serde(rename = "L", default)]
    last_filled_price: String,
    #[serde(rename = "l", default)]
    last_filled_quantity: String,
    #[serde(rename = "z", default)]
    cumulative_quantity: String,
    #[serde(rename = "n", default)]
    commission: String,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
    #[serde(rename = "rp", default)]
    realized_pnl: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

fn parse_dec(value: &str) -> rust_decimal::Decimal {
    value.parse().unwrap_or_default()
}

/// Subscribes to combined kline + ticker streams and feeds parsed events into
/// a channel. The background task reconnects forever until the receiver goes
/// away.
pub(crate) fn spawn_market_stream(
    ws_base: &str,
    symbols: &[String],
    interval: &str,
) -> Result<mpsc::Receiver<MarketEvent>, GatewayError> {
    let (tx, rx) = mpsc::channel(1024);

    let streams = symbols
        .iter()
        .flat_map(|s| {
            let lower = s.to_lowercase();
            [format!("{}@kline_{}", lower, interval), format!("{}@ticker", lower)]
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut url = Url::parse(ws_base).map_err(|e| GatewayError::Connectivity(e.to_string()))?;
    url.set_path("/stream");
    url.set_query(Some(&format!("streams={}", streams)));

    tokio::spawn(async move {
        loop {
            tracing::info!(url = %url, "Connecting to market stream...");
            match connect_async(url.as_str()).await {
                Ok((mut stream, _)) => {
                    tracing::info!("Market stream connected.");
                    while let Some(msg) = stream.next().await {
                        let Ok(Message::Text(text)) = msg else {
                            continue;
                        };
                        let Ok(wrapper) = serde_json::from_str::<WsStreamWrapper>(&text) else {
                            continue;
                        };
                        let Some(event) = parse_market_event(wrapper.data) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            tracing::debug!("Market stream receiver dropped, closing.");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Market stream connection error.");
                }
            }
            if tx.is_closed() {
                return;
            }
            tracing::warn!(
                "Market stream disconnected. Reconnecting in {} seconds...",
                RECONNECT_DELAY_SECS
            );
            tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    });

    Ok(rx)
}

fn parse_market_event(data: serde_json::Value) -> Option<MarketEvent> {
    let event_type = data.get("e")?.as_str()?;
    match event_type {
        "kline" => {
            let event: WsKlineEvent = serde_json::from_value(data).ok()?;
            // Only closed candles are actionable for strategies.
            if !event.kline.is_closed {
                return None;
            }
            let k = event.kline;
            Some(MarketEvent::Kline {
                symbol: event.symbol,
                kline: Kline {
                    open_time: Utc.timestamp_millis_opt(k.open_time).single()?,
                    open: parse_dec(&k.open),
                    high: parse_dec(&k.high),
                    low: parse_dec(&k.low),
                    close: parse_dec(&k.close),
                    volume: parse_dec(&k.volume),
                    close_time: Utc.timestamp_millis_opt(k.close_time).single()?,
                    interval: k.interval,
                },
            })
        }
        "24hrTicker" => {
            let event: WsTickerEvent = serde_json::from_value(data).ok()?;
            Some(MarketEvent::Ticker(Ticker {
                symbol: event.symbol,
                price: parse_dec(&event.last_price),
                timestamp: Utc.timestamp_millis_opt(event.event_time).single()?,
            }))
        }
        _ => None,
    }
}

/// Acquires a listen key and streams user events, keeping the key alive and
/// reconnecting on failure.
pub(crate) async fn spawn_user_stream(
    gateway: BinanceFutures,
) -> Result<mpsc::Receiver<UserEvent>, GatewayError> {
    let (tx, rx) = mpsc::channel(1024);

    let response = gateway.listen_key_request().send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Auth(format!(
            "listen key request failed with {}",
            status
        )));
    }
    let listen_key: ListenKeyResponse = response
        .json()
        .await
        .map_err(|e| GatewayError::Deserialization(e.to_string()))?;

    let ws_base = ws_url(&gateway).to_string();
    tokio::spawn(async move {
        let mut keepalive =
            tokio::time::interval(std::time::Duration::from_secs(LISTEN_KEY_KEEPALIVE_SECS));
        keepalive.tick().await; // first tick fires immediately

        loop {
            let url = format!("{}/ws/{}", ws_base, listen_key.listen_key);
            tracing::info!("Connecting to user stream...");
            match connect_async(url.as_str()).await {
                Ok((mut stream, _)) => {
                    tracing::info!("User stream connected.");
                    loop {
                        tokio::select! {
                            msg = stream.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Some(event) = parse_user_event(&text) {
                                            if tx.send(event).await.is_err() {
                                                tracing::debug!("User stream receiver dropped, closing.");
                                                return;
                                            }
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        tracing::error!(error = %e, "User stream error.");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                            _ = keepalive.tick() => {
                                if let Err(e) = gateway.listen_key_keepalive().send().await {
                                    tracing::warn!(error = %e, "Listen key keepalive failed.");
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "User stream connection error.");
                }
            }
            if tx.is_closed() {
                return;
            }
            tracing::warn!(
                "User stream disconnected. Reconnecting in {} seconds...",
                RECONNECT_DELAY_SECS
            );
            tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    });

    Ok(rx)
}

fn parse_user_event(text: &str) -> Option<UserEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("e")?.as_str()? != "ORDER_TRADE_UPDATE" {
        return None;
    }
    let update: WsOrderTradeUpdate = serde_json::from_value(value).ok()?;
    let o = update.order;
    let status = parse_status(&o.order_status).ok()?;
    let side = match o.side.as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        _ => return None,
    };
    let executed_at = Utc.timestamp_millis_opt(o.trade_time).single()?;

    if o.execution_type == "TRADE" && o.trade_id > 0 {
        Some(UserEvent::Fill(FillEvent {
            symbol: o.symbol,
            side,
            exchange_order_id: o.order_id.to_string(),
            client_order_id: o.client_order_id,
            exchange_trade_id: o.trade_id.to_string(),
            price: parse_dec(&o.last_filled_price),
            quantity: parse_dec(&o.last_filled_quantity),
            commission: parse_dec(&o.commission),
            commission_asset: o.commission_asset.unwrap_or_else(|| "USDT".to_string()),
            realized_pnl: parse_dec(&o.realized_pnl),
            order_status: status,
            executed_at,
        }))
    } else {
        Some(UserEvent::OrderUpdate(OrderStatusReport {
            exchange_order_id: o.order_id.to_string(),
            client_order_id: o.client_order_id,
            symbol: o.symbol,
            status,
            executed_quantity: parse_dec(&o.cumulative_quantity),
            average_price: None,
            updated_at: Some(executed_at),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_events_parse_from_order_trade_update() {
        let text = r#"{
            "e": "ORDER_TRADE_UPDATE", "E": 1700000000000,
            "o": {
                "s": "BTCUSDT", "S": "BUY", "i": 42, "c": "client-1",
                "x": "TRADE", "X": "PARTIALLY_FILLED", "t": 7,
                "L": "50000.0", "l": "0.5", "z": "0.5",
                "n": "0.02", "N": "USDT", "rp": "12.5", "T": 1700000000000
            }
        }"#;
        let event = parse_user_event(text).unwrap();
        let UserEvent::Fill(fill) = event else {
            panic!("expected fill event");
        };
        assert_eq!(fill.exchange_trade_id, "7");
        assert_eq!(fill.quantity.to_string(), "0.5");
        assert_eq!(fill.realized_pnl.to_string(), "12.5");
        assert_eq!(fill.order_status, core_types::OrderStatus::PartiallyFilled);
    }

    #[test]
    fn non_trade_updates_become_order_updates() {
        let text = r#"{
            "e": "ORDER_TRADE_UPDATE", "E": 1700000000000,
            "o": {
                "s": "BTCUSDT", "S": "SELL", "i": 43, "c": "client-2",
                "x": "CANCELED", "X": "CANCELED", "t": 0,
                "L": "0", "l": "0", "z": "0", "n": "0", "N": null,
                "rp": "0", "T": 1700000000000
            }
        }"#;
        let event = parse_user_event(text).unwrap();
        assert!(matches!(
            event,
            UserEvent::OrderUpdate(OrderStatusReport {
                status: core_types::OrderStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        assert!(parse_user_event(r#"{"e": "ACCOUNT_UPDATE"}"#).is_none());
    }
}
