//! In-process bus for tests and single-node runs without a broker.

use super::{envelope, BusConsumer, BusProducer};
use crate::error::BusError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

const SUBSCRIPTION_BUFFER: usize = 1024;

/// A message accepted by [`MemoryBus::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub message: String,
}

impl PublishedMessage {
    /// Decoded envelope body, without the prefix.
    pub fn body(&self) -> Option<Map<String, Value>> {
        envelope::decode(&self.message)
    }

    pub fn command(&self) -> Option<String> {
        self.body()?
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Bus implementation that keeps everything in memory.
///
/// Published envelopes are recorded and fanned out on a broadcast channel.
/// Deliveries for a subscribed topic are injected with [`deliver`](Self::deliver).
/// Connection failures can be scripted with [`fail_connects`](Self::fail_connects).
pub struct MemoryBus {
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<HashMap<String, mpsc::Sender<String>>>,
    events: broadcast::Sender<PublishedMessage>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            connected: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Makes the next `attempts` calls to `connect`/`subscribe` fail.
    pub fn fail_connects(&self, attempts: usize) {
        self.failing_connects.store(attempts, Ordering::SeqCst);
    }

    /// Connects unconditionally, bypassing scripted failures.
    pub async fn connect_now(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of every envelope published so far.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Published envelopes whose body carries `command`.
    pub async fn published_with_command(&self, command: &str) -> Vec<Map<String, Value>> {
        self.published
            .lock()
            .await
            .iter()
            .filter_map(PublishedMessage::body)
            .filter(|body| body.get("command").and_then(Value::as_str) == Some(command))
            .collect()
    }

    /// Live feed of published envelopes.
    pub fn watch(&self) -> broadcast::Receiver<PublishedMessage> {
        self.events.subscribe()
    }

    /// Pushes a message to the consumer subscribed on `topic`.
    ///
    /// Returns `false` when nobody subscribed to that topic or the consumer is gone.
    pub async fn deliver(&self, topic: &str, payload: impl Into<String>) -> bool {
        let sender = self.subscriptions.lock().await.get(topic).cloned();
        match sender {
            Some(sender) => sender.send(payload.into()).await.is_ok(),
            None => false,
        }
    }

    fn take_scripted_failure(&self) -> bool {
        self.failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusProducer for MemoryBus {
    async fn connect(&self) -> Result<(), BusError> {
        if self.take_scripted_failure() {
            return Err(BusError::Unavailable("memory bus refused connection".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, message: String) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Unavailable("producer is not connected".to_string()));
        }
        debug!("[{}] {}", topic, message);
        let record = PublishedMessage {
            topic: topic.to_string(),
            message,
        };
        self.published.lock().await.push(record.clone());
        // No watchers is fine.
        let _ = self.events.send(record);
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError> {
        if self.take_scripted_failure() {
            return Err(BusError::Unavailable("memory bus refused subscription".to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscriptions.lock().await.insert(topic.to_string(), tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connect_failures_are_consumed() {
        let bus = MemoryBus::new();
        bus.fail_connects(2);

        assert!(bus.connect().await.is_err());
        assert!(bus.connect().await.is_err());
        assert!(bus.connect().await.is_ok());
        assert!(bus.is_connected());
    }

    #[tokio::test]
    async fn test_deliver_reaches_subscriber_of_that_topic_only() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("as_rtm_websockets_a").await.unwrap();

        assert!(bus.deliver("as_rtm_websockets_a", "hello").await);
        assert!(!bus.deliver("as_rtm_websockets_b", "hello").await);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_watchers_see_published_envelopes() {
        let bus = MemoryBus::new();
        bus.connect_now().await;
        let mut watch = bus.watch();

        bus.publish("q", r#"JSONRTMOBJ#{"command":"ws_stats"}"#.to_string())
            .await
            .unwrap();

        let seen = watch.recv().await.unwrap();
        assert_eq!(seen.command().as_deref(), Some("ws_stats"));
        assert_eq!(bus.published_with_command("ws_stats").await.len(), 1);
    }
}
