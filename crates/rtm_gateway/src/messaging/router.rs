//! Inbound frame dispatch.

use super::types::{Command, RelayCommand, PONG_FRAME};
use crate::auth::{IdentityKey, TokenValidator};
use crate::bus::BusPublisher;
use crate::connection::{ConnectionRegistry, SocketHandle};
use crate::error::AuthError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a socket was closed by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidJson,
    AuthFailed(AuthError),
    Unauthenticated(Option<String>),
    UnknownCommand(Option<String>),
    /// The socket went away while authentication was in flight.
    SocketClosed,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Authenticated(IdentityKey),
    Pong,
    Forwarded(RelayCommand),
    Rejected(Rejection),
}

impl RouteOutcome {
    /// Whether the router has closed the socket.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteOutcome::Rejected(_))
    }
}

/// Dispatches client frames: authentication, application pings, and relaying
/// of whitelisted commands to the bus.
///
/// Any protocol violation increments the error counter and closes the socket.
#[derive(Debug)]
pub struct CommandRouter {
    registry: Arc<ConnectionRegistry>,
    validator: TokenValidator,
    publisher: Arc<BusPublisher>,
}

impl CommandRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, validator: TokenValidator, publisher: Arc<BusPublisher>) -> Self {
        Self {
            registry,
            validator,
            publisher,
        }
    }

    /// Routes one text frame received on `socket`.
    ///
    /// # Arguments
    ///
    /// * `socket` - The socket the frame arrived on
    /// * `text` - The raw frame (expected to be a JSON object)
    ///
    /// # Returns
    ///
    /// The routing outcome. When [`RouteOutcome::is_terminal`] holds, the
    /// socket has already been asked to close.
    pub async fn route(&self, socket: &SocketHandle, text: &str) -> RouteOutcome {
        let frame = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(frame)) => frame,
            Ok(_) => Map::new(),
            Err(e) => {
                debug!("Connection {} sent invalid JSON: {}", socket.id(), e);
                return self.reject(socket, Rejection::InvalidJson).await;
            }
        };

        match Command::classify(frame.get("command").and_then(Value::as_str)) {
            Command::Auth => self.authenticate(socket, &frame).await,
            Command::Ping => {
                socket.send_text(PONG_FRAME);
                self.registry.record_received();
                RouteOutcome::Pong
            }
            Command::Relay(command) => {
                let Some(identity) = self.registry.lookup_identity(socket).await else {
                    let rejection = Rejection::Unauthenticated(Some(command.to_string()));
                    return self.reject(socket, rejection).await;
                };
                self.publisher.publish_for(&identity, frame).await;
                self.registry.record_received();
                RouteOutcome::Forwarded(command)
            }
            Command::Unknown(command) => {
                let rejection = if self.registry.lookup_identity(socket).await.is_some() {
                    Rejection::UnknownCommand(command)
                } else {
                    Rejection::Unauthenticated(command)
                };
                self.reject(socket, rejection).await
            }
        }
    }

    async fn authenticate(&self, socket: &SocketHandle, frame: &Map<String, Value>) -> RouteOutcome {
        let verified = match frame.get("auth_token").and_then(Value::as_str) {
            Some(token) => self.validator.verify(token),
            None => Err(AuthError::Malformed("auth_token is missing".to_string())),
        };

        match verified {
            Ok(claims) => match self.registry.register(socket, claims).await {
                Some(identity) => {
                    self.registry.record_received();
                    RouteOutcome::Authenticated(identity)
                }
                None => RouteOutcome::Rejected(Rejection::SocketClosed),
            },
            Err(e) => {
                warn!("Authentication failed on connection {} from {}: {}", socket.id(), socket.remote_addr(), e);
                self.registry.record_error();
                // Any session still bound to the socket is purged by the close path.
                socket.terminate();
                RouteOutcome::Rejected(Rejection::AuthFailed(e))
            }
        }
    }

    async fn reject(&self, socket: &SocketHandle, rejection: Rejection) -> RouteOutcome {
        debug!("Rejecting connection {}: {:?}", socket.id(), rejection);
        self.registry.record_error();
        self.registry.purge(socket, true).await;
        RouteOutcome::Rejected(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::connection::Outbound;
    use crate::test_support::{claims_json, drain, mint, registry_with_bus, test_addr, SECRET};
    use serde_json::json;

    async fn router() -> (CommandRouter, Arc<ConnectionRegistry>, Arc<MemoryBus>) {
        let (registry, bus) = registry_with_bus().await;
        let publisher = Arc::new(BusPublisher::new(bus.clone(), "bg", "rtm-test"));
        let router = CommandRouter::new(registry.clone(), TokenValidator::new(SECRET), publisher);
        (router, registry, bus)
    }

    fn auth_frame(user_id: &str, fp: &str) -> String {
        json!({
            "command": "ws_auth",
            "auth_token": mint(SECRET, &claims_json(user_id, fp, "Android 14")),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_auth_registers_socket() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;

        let outcome = router.route(&socket, &auth_frame("42", "abc")).await;

        assert_eq!(outcome, RouteOutcome::Authenticated(IdentityKey::from_parts("42", "abc")));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(registry.counts().await.android, 1);
        assert_eq!(bus.published_with_command("ws_cache_connection").await.len(), 1);
        assert_eq!(registry.take_traffic().received, 1);
    }

    #[tokio::test]
    async fn test_ping_replies_pong_without_auth() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;

        let outcome = router.route(&socket, r#"{"command":"ws_ping"}"#).await;

        assert_eq!(outcome, RouteOutcome::Pong);
        assert_eq!(drain(&mut rx), vec![Outbound::Text(PONG_FRAME.to_string())]);
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_ping_after_auth_publishes_nothing() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;
        router.route(&socket, &auth_frame("42", "abc")).await;
        let before = bus.published().await.len();

        let outcome = router.route(&socket, r#"{"command":"ws_ping"}"#).await;

        assert_eq!(outcome, RouteOutcome::Pong);
        assert_eq!(drain(&mut rx), vec![Outbound::Text(PONG_FRAME.to_string())]);
        assert_eq!(bus.published().await.len(), before);
        assert_eq!(registry.lookup_identity(&socket).await, Some(IdentityKey::from_parts("42", "abc")));
    }

    #[tokio::test]
    async fn test_relay_requires_authentication() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;

        let outcome = router
            .route(&socket, r#"{"command":"ws_add_reaction","message_id":1}"#)
            .await;

        assert_eq!(
            outcome,
            RouteOutcome::Rejected(Rejection::Unauthenticated(Some("ws_add_reaction".to_string())))
        );
        assert_eq!(drain(&mut rx), vec![Outbound::Terminate]);
        assert!(bus.published().await.is_empty());
        assert_eq!(registry.take_traffic().errors, 1);
        assert_eq!(registry.counts().await.sockets, 0);
    }

    #[tokio::test]
    async fn test_relay_publishes_stamped_frame() {
        let (router, registry, bus) = router().await;
        let (socket, _rx) = registry.track(test_addr()).await;
        router.route(&socket, &auth_frame("42", "abc")).await;

        let outcome = router
            .route(&socket, r#"{"command":"ws_add_reaction","message_id":991,"reaction":"+1"}"#)
            .await;

        assert_eq!(outcome, RouteOutcome::Forwarded(RelayCommand::AddReaction));
        let relayed = bus.published_with_command("ws_add_reaction").await;
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0]["message_id"], json!(991));
        assert_eq!(relayed[0]["reaction"], json!("+1"));
        assert_eq!(relayed[0]["user_signature"], json!("42_abc"));
        assert_eq!(relayed[0]["source"], json!("websocket_server"));
        assert_eq!(relayed[0]["host"], json!("rtm-test"));
    }

    #[tokio::test]
    async fn test_relay_keeps_client_field_order() {
        let (router, registry, bus) = router().await;
        let (socket, _rx) = registry.track(test_addr()).await;
        router.route(&socket, &auth_frame("42", "abc")).await;

        router
            .route(&socket, r#"{"command":"ws_read_notification","zeta":1,"alpha":{"y":2,"b":3}}"#)
            .await;

        let relayed = bus
            .published()
            .await
            .into_iter()
            .find(|m| m.command().as_deref() == Some("ws_read_notification"))
            .unwrap();
        assert_eq!(
            relayed.message,
            r#"JSONRTMOBJ#{"command":"ws_read_notification","zeta":1,"alpha":{"y":2,"b":3},"user_signature":"42_abc","source":"websocket_server","host":"rtm-test"}"#
        );
    }

    #[tokio::test]
    async fn test_bad_token_terminates_without_cache() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;
        let frame = json!({
            "command": "ws_auth",
            "auth_token": mint("wrong-secret", &claims_json("42", "abc", "")),
        });

        let outcome = router.route(&socket, &frame.to_string()).await;

        assert_eq!(outcome, RouteOutcome::Rejected(Rejection::AuthFailed(AuthError::InvalidSignature)));
        assert_eq!(drain(&mut rx), vec![Outbound::Terminate]);
        assert!(bus.published().await.is_empty());
        assert_eq!(registry.take_traffic().errors, 1);
    }

    #[tokio::test]
    async fn test_invalid_json_purges_and_terminates() {
        let (router, registry, bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;
        router.route(&socket, &auth_frame("42", "abc")).await;

        let outcome = router.route(&socket, "{oops").await;

        assert_eq!(outcome, RouteOutcome::Rejected(Rejection::InvalidJson));
        assert_eq!(drain(&mut rx), vec![Outbound::Terminate]);
        assert_eq!(registry.counts().await.active, 0);
        let purged = bus.published_with_command("ws_purge_connection").await;
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0]["user_signature"], json!("42_abc"));
    }

    #[tokio::test]
    async fn test_unknown_command_after_auth_is_rejected() {
        let (router, registry, _bus) = router().await;
        let (socket, mut rx) = registry.track(test_addr()).await;
        router.route(&socket, &auth_frame("42", "abc")).await;

        let outcome = router.route(&socket, r#"{"command":"ws_shutdown"}"#).await;

        assert_eq!(
            outcome,
            RouteOutcome::Rejected(Rejection::UnknownCommand(Some("ws_shutdown".to_string())))
        );
        assert_eq!(drain(&mut rx), vec![Outbound::Terminate]);
        assert_eq!(registry.counts().await.active, 0);
        assert_eq!(registry.take_traffic().errors, 1);
    }
}
