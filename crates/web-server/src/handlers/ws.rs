use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use events::{WsMessage, channels};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;

/// Messages a live session may send. Everything else gets an error reply.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    SubscribeSymbol { symbols: Vec<String> },
    SubscribeTicker { symbols: Vec<String> },
    SubscribeTrades { symbols: Vec<String> },
    SubscribeOrderbook { symbols: Vec<String> },
    Ping,
}

/// Upgrades an authenticated request into a live session attached to the
/// fan-out bus.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(state, user.user_id, socket))
}

async fn run_session(state: Arc<AppState>, user_id: Uuid, socket: WebSocket) {
    let (session_id, mut outbound) = state.bus.register(user_id);
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(user_id = %user_id, session_id = %session_id, "Live session connected");

    loop {
        tokio::select! {
            // Events published for this session, delivered in publish order.
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            // Client protocol messages.
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state, session_id, &text);
                        if let Some(reply) = reply {
                            let Ok(text) = serde_json::to_string(&reply) else { continue };
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "Session receive error");
                        break;
                    }
                }
            }
        }
    }

    state.bus.unregister(session_id);
    tracing::info!(user_id = %user_id, session_id = %session_id, "Live session disconnected");
}

fn handle_client_message(
    state: &AppState,
    session_id: events::SessionId,
    text: &str,
) -> Option<WsMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return Some(WsMessage::Error {
                message: format!("Unknown message: {}", e),
            });
        }
    };

    match message {
        ClientMessage::Subscribe { channels } => {
            state.bus.subscribe(session_id, &channels).ok()?;
            Some(WsMessage::Subscribed { channels })
        }
        ClientMessage::Unsubscribe { channels } => {
            state.bus.unsubscribe(session_id, &channels).ok()?;
            Some(WsMessage::Unsubscribed { channels })
        }
        ClientMessage::SubscribeSymbol { symbols } | ClientMessage::SubscribeTicker { symbols } => {
            let channels: Vec<String> =
                symbols.iter().map(|s| channels::ticker(&s.to_uppercase())).collect();
            state.bus.subscribe(session_id, &channels).ok()?;
            Some(WsMessage::Subscribed { channels })
        }
        ClientMessage::SubscribeTrades { symbols } => {
            let channels: Vec<String> =
                symbols.iter().map(|s| channels::trades(&s.to_uppercase())).collect();
            state.bus.subscribe(session_id, &channels).ok()?;
            Some(WsMessage::Subscribed { channels })
        }
        ClientMessage::SubscribeOrderbook { symbols } => {
            let channels: Vec<String> =
                symbols.iter().map(|s| channels::orderbook(&s.to_uppercase())).collect();
            state.bus.subscribe(session_id, &channels).ok()?;
            Some(WsMessage::Subscribed { channels })
        }
        ClientMessage::Ping => Some(WsMessage::Pong {
            timestamp: Utc::now(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_the_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "subscribe", "channels": ["orders", "bots"]}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { channels } if channels.len() == 2));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "subscribe_ticker", "symbols": ["BTCUSDT"]}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::SubscribeTicker { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "shout"}"#).is_err());
    }
}
