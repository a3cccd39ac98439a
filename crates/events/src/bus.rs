use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::EventsError;
use crate::messages::WsMessage;

/// Outbound queue depth per client session. A session that cannot drain this
/// many messages starts losing events rather than blocking producers.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

pub type SessionId = Uuid;

struct SessionEntry {
    user_id: Uuid,
    channels: HashSet<String>,
    tx: mpsc::Sender<WsMessage>,
}

/// Pushes per-user and per-symbol events to subscribed long-lived client
/// sessions.
///
/// Delivery to a single session preserves publish order. Producers never
/// block on a slow consumer: a full session queue drops the event for that
/// session and bumps the dropped-event counter.
#[derive(Default)]
pub struct FanoutBus {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    dropped_events: AtomicU64,
}

impl FanoutBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for a user and returns its id plus the receive
    /// half of its bounded queue.
    pub fn register(&self, user_id: Uuid) -> (SessionId, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let session_id = Uuid::new_v4();
        let mut sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                channels: HashSet::new(),
                tx,
            },
        );
        (session_id, rx)
    }

    pub fn unregister(&self, session_id: SessionId) {
        let mut sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        sessions.remove(&session_id);
    }

    pub fn subscribe(&self, session_id: SessionId, channels: &[String]) -> Result<(), EventsError> {
        let mut sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(EventsError::UnknownSession(session_id))?;
        entry.channels.extend(channels.iter().cloned());
        Ok(())
    }

    pub fn unsubscribe(
        &self,
        session_id: SessionId,
        channels: &[String],
    ) -> Result<(), EventsError> {
        let mut sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(EventsError::UnknownSession(session_id))?;
        for channel in channels {
            entry.channels.remove(channel);
        }
        Ok(())
    }

    /// Delivers to every session of `user_id` subscribed to `channel`.
    pub fn publish_to_user(&self, user_id: Uuid, channel: &str, message: WsMessage) {
        let sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        for entry in sessions.values() {
            if entry.user_id == user_id && entry.channels.contains(channel) {
                self.deliver(entry, &message);
            }
        }
    }

    /// Delivers a market event to every session subscribed to the channel,
    /// regardless of user.
    pub fn publish_market(&self, channel: &str, message: WsMessage) {
        let sessions = self.sessions.lock().expect("fanout bus lock poisoned");
        for entry in sessions.values() {
            if entry.channels.contains(channel) {
                self.deliver(entry, &message);
            }
        }
    }

    fn deliver(&self, entry: &SessionEntry, message: &WsMessage) {
        if let Err(mpsc::error::TrySendError::Full(_)) = entry.tx.try_send(message.clone()) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(user_id = %entry.user_id, "Session queue full, dropping event.");
        }
    }

    /// Events dropped because a session queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("fanout bus lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::channels;
    use chrono::Utc;

    fn pong() -> WsMessage {
        WsMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_only_to_subscribed_sessions_of_user() {
        let bus = FanoutBus::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        let (session_a, mut rx_a) = bus.register(user_a);
        let (_session_b, mut rx_b) = bus.register(user_b);
        bus.subscribe(session_a, &[channels::BOTS.to_string()]).unwrap();

        bus.publish_to_user(user_a, channels::BOTS, pong());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn market_channels_cross_users() {
        let bus = FanoutBus::new();
        let (session_a, mut rx_a) = bus.register(Uuid::new_v4());
        let (session_b, mut rx_b) = bus.register(Uuid::new_v4());
        let channel = channels::ticker("BTCUSDT");
        bus.subscribe(session_a, std::slice::from_ref(&channel)).unwrap();
        bus.subscribe(session_b, std::slice::from_ref(&channel)).unwrap();

        bus.publish_market(&channel, pong());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let bus = FanoutBus::new();
        let user = Uuid::new_v4();
        let (session, _rx) = bus.register(user);
        bus.subscribe(session, &[channels::ORDERS.to_string()]).unwrap();

        for _ in 0..SESSION_QUEUE_CAPACITY + 3 {
            bus.publish_to_user(user, channels::ORDERS, pong());
        }
        assert_eq!(bus.dropped_count(), 3);
    }

    #[tokio::test]
    async fn unregister_removes_session() {
        let bus = FanoutBus::new();
        let (session, _rx) = bus.register(Uuid::new_v4());
        assert_eq!(bus.session_count(), 1);
        bus.unregister(session);
        assert_eq!(bus.session_count(), 0);
        assert!(bus.subscribe(session, &["x".to_string()]).is_err());
    }
}
