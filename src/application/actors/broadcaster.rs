//! Real-Time Event Broadcaster
//!
//! Fans ledger and call-state changes out to live WebSocket subscribers.
//! Delivery is at-most-once and best-effort: with no subscriber connected
//! the event is dropped, and a reconnecting client re-fetches state instead
//! of replaying missed events.

use crate::domain::entities::call_session::CallSession;
use crate::domain::entities::trade::Trade;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    TradeExecuted { user_id: String, trade: Trade },
    CallStatusChanged { user_id: String, call: CallSession },
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<BrokerEvent>,
}

/// Registry of live subscriber connections keyed by user id; zero or more
/// connections per user.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a connection for `user_id`. Returns the subscriber id
    /// (needed to unsubscribe) and the event receiver.
    pub async fn subscribe(&self, user_id: &str) -> (u64, mpsc::UnboundedReceiver<BrokerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.lock().await;
        subscribers
            .entry(user_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        debug!("Subscriber {} connected for user {}", id, user_id);
        (id, rx)
    }

    /// Drop one connection. Events published while disconnected are lost.
    pub async fn unsubscribe(&self, user_id: &str, subscriber_id: u64) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(connections) = subscribers.get_mut(user_id) {
            connections.retain(|s| s.id != subscriber_id);
            if connections.is_empty() {
                subscribers.remove(user_id);
            }
        }
        debug!("Subscriber {} disconnected for user {}", subscriber_id, user_id);
    }

    /// Deliver `event` to every currently-connected subscriber for the
    /// user. Returns the number of deliveries; zero means the event was
    /// dropped.
    pub async fn publish(&self, user_id: &str, event: BrokerEvent) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let Some(connections) = subscribers.get_mut(user_id) else {
            debug!("No subscribers for user {}, event dropped", user_id);
            return 0;
        };

        // Sends to closed channels identify dead connections; prune them
        connections.retain(|s| s.tx.send(event.clone()).is_ok());
        let delivered = connections.len();
        if connections.is_empty() {
            subscribers.remove(user_id);
        }
        delivered
    }

    pub async fn subscriber_count(&self, user_id: &str) -> usize {
        let subscribers = self.subscribers.lock().await;
        subscribers.get(user_id).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::trade::TradeAction;
    use crate::domain::value_objects::{price::Price, shares::Shares, ticker::Ticker};

    fn trade_event() -> BrokerEvent {
        BrokerEvent::TradeExecuted {
            user_id: "user-1".to_string(),
            trade: Trade::new(
                "user-1".to_string(),
                Ticker::new("AAPL").unwrap(),
                TradeAction::Buy,
                Shares::new(10).unwrap(),
                Price::new(150.0).unwrap(),
                None,
            ),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let (_id1, mut rx1) = broadcaster.subscribe("user-1").await;
        let (_id2, mut rx2) = broadcaster.subscribe("user-1").await;

        let delivered = broadcaster.publish("user-1", trade_event()).await;
        assert_eq!(delivered, 2);

        assert!(matches!(
            rx1.recv().await,
            Some(BrokerEvent::TradeExecuted { .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(BrokerEvent::TradeExecuted { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_drops() {
        let broadcaster = Broadcaster::new();
        let delivered = broadcaster.publish("user-1", trade_event()).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_publish_scoped_to_user() {
        let broadcaster = Broadcaster::new();
        let (_id, mut other_rx) = broadcaster.subscribe("user-2").await;

        broadcaster.publish("user-1", trade_event()).await;
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_event() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish("user-1", trade_event()).await;

        let (_id, mut rx) = broadcaster.subscribe("user-1").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = Broadcaster::new();
        let (id, mut rx) = broadcaster.subscribe("user-1").await;
        broadcaster.unsubscribe("user-1", id).await;

        let delivered = broadcaster.publish("user-1", trade_event()).await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connections_pruned() {
        let broadcaster = Broadcaster::new();
        let (_id, rx) = broadcaster.subscribe("user-1").await;
        drop(rx);

        let delivered = broadcaster.publish("user-1", trade_event()).await;
        assert_eq!(delivered, 0);
        assert_eq!(broadcaster.subscriber_count("user-1").await, 0);
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(trade_event()).unwrap();
        assert_eq!(json["type"], "trade_executed");
        assert_eq!(json["trade"]["ticker"], "AAPL");
    }
}
