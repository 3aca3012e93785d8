//! Envelope stamping and fire-and-forget publishing.

use super::{envelope, BusProducer};
use crate::auth::IdentityKey;
use crate::config::SOURCE_ID;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{trace, warn};

/// Stamps and publishes every gateway→bus envelope.
///
/// All envelopes carry `source` and `host`; envelopes that concern a session
/// also carry `user_signature`. Publish failures are logged and dropped: a lost
/// relay or telemetry event is acceptable and retried delivery is not offered.
pub struct BusPublisher {
    producer: Arc<dyn BusProducer>,
    topic: String,
    host: String,
}

impl BusPublisher {
    pub fn new(producer: Arc<dyn BusProducer>, topic: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            host: host.into(),
        }
    }

    /// The resolved host name stamped on every envelope.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Publishes a message on behalf of a session.
    pub async fn publish_for(&self, identity: &IdentityKey, mut body: Map<String, Value>) {
        body.insert(
            "user_signature".to_string(),
            Value::String(identity.as_str().to_string()),
        );
        self.publish_system(body).await;
    }

    /// Publishes a gateway-level message (no session attached).
    pub async fn publish_system(&self, mut body: Map<String, Value>) {
        body.insert("source".to_string(), Value::String(SOURCE_ID.to_string()));
        body.insert("host".to_string(), Value::String(self.host.clone()));

        let message = envelope::encode(&body);
        trace!("Publishing to '{}': {}", self.topic, message);
        if let Err(e) = self.producer.publish(&self.topic, message).await {
            warn!(
                command = body.get("command").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "Dropping bus message: {}",
                e
            );
        }
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("topic", &self.topic)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
