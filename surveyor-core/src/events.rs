//! Push-based progress notifications. Delivery is best effort: a subscriber
//! only sees events published after it subscribed, and a lagging one may
//! miss some. The database holds the authoritative terminal state.

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Scan,
    Run,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub channel: Channel,
    pub id: i64,
    pub name: String,
    pub payload: Value,
}

pub trait EventSink: Send + Sync {
    /// Fire and forget.
    fn emit(&self, channel: Channel, id: i64, name: &str, payload: Value);

    fn progress(&self, channel: Channel, id: i64, percent: u8, message: &str) {
        self.emit(
            channel,
            id,
            "progress",
            json!({ "percent": percent, "message": message }),
        );
    }
}

/// Fan-out to any number of live subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, channel: Channel, id: i64, name: &str, payload: Value) {
        let event = Event {
            channel,
            id,
            name: name.to_string(),
            payload,
        };
        if self.sender.send(event).is_err() {
            trace!("No subscribers for {:?} {} event '{}'", channel, id, name);
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _channel: Channel, _id: i64, _name: &str, _payload: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.progress(Channel::Scan, 7, 5, "Launching browser...");
        bus.emit(Channel::Scan, 7, "done", json!({"pages": 1}));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "progress");
        assert_eq!(first.payload["percent"], 5);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.name, "done");
        assert_eq!(second.id, 7);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::default();
        bus.emit(Channel::Run, 1, "status", json!({"phase": "executing"}));
        let mut rx = bus.subscribe();
        bus.emit(Channel::Run, 1, "done", json!({}));
        assert_eq!(rx.recv().await.unwrap().name, "done");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        EventBus::new(1).emit(Channel::Scan, 1, "progress", json!({}));
        NullSink.progress(Channel::Scan, 1, 50, "ignored");
    }
}
