//! Bus→client delivery relay.

use super::ENVELOPE_PREFIX;
use crate::auth::claims::string_or_number;
use crate::auth::IdentityKey;
use crate::connection::ConnectionRegistry;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct DeliveryToken {
    #[serde(deserialize_with = "string_or_number")]
    user_id: String,
    #[serde(deserialize_with = "string_or_number")]
    finger_print: String,
}

/// A message consumed from this instance's topic.
///
/// ```json
/// { "token": { "user_id": "42", "finger_print": "abc" }, "rtm_payload": { ... } }
/// ```
#[derive(Debug, Deserialize)]
pub struct BusDelivery {
    token: DeliveryToken,
    rtm_payload: Box<RawValue>,
}

impl BusDelivery {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let body = raw.strip_prefix(ENVELOPE_PREFIX).unwrap_or(raw);
        serde_json::from_str(body)
    }

    pub fn recipient(&self) -> IdentityKey {
        IdentityKey::from_parts(&self.token.user_id, &self.token.finger_print)
    }

    /// The payload text exactly as it appeared in the bus message.
    pub fn payload_text(&self) -> &str {
        self.rtm_payload.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered(IdentityKey),
    /// The recipient has no session on this instance.
    NoRecipient(IdentityKey),
    Malformed,
}

/// Forwards consumed bus messages to the socket holding the addressed identity.
#[derive(Debug, Clone)]
pub struct DeliveryRelay {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Relays one consumed message.
    pub async fn relay(&self, raw: &str) -> DeliveryOutcome {
        let delivery = match BusDelivery::parse(raw) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Skipping undecodable bus message: {}", e);
                return DeliveryOutcome::Malformed;
            }
        };

        let recipient = delivery.recipient();
        if self
            .registry
            .send_to_identity(&recipient, delivery.payload_text().to_string())
            .await
        {
            debug!("Delivered bus message to {}", recipient);
            DeliveryOutcome::Delivered(recipient)
        } else {
            debug!("No live session for {}, dropping bus message", recipient);
            DeliveryOutcome::NoRecipient(recipient)
        }
    }

    /// Drains the consumer until it closes or shutdown is signalled.
    pub async fn run(self, mut messages: mpsc::Receiver<String>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(raw) => {
                        self.relay(&raw).await;
                    }
                    None => {
                        warn!("Bus consumer closed, delivery relay stopping");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Delivery relay shutting down");
                    break;
                }
            }
        }
    }
}
