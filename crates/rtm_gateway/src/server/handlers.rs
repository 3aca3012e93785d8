//! Connection handling logic for WebSocket clients.
//!
//! This module manages the lifecycle of one client connection: handshake,
//! tracking, inbound frame routing, outbound frame writing, and cleanup.

use crate::connection::{ConnectionRegistry, Outbound};
use crate::error::GatewayError;
use crate::messaging::CommandRouter;
use futures::{Sink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, trace};

/// How long a closing handshake may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handles a single client connection from handshake to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket handshake
/// 2. Track the socket in the registry (heartbeat applies from here on)
/// 3. Run the reader and the writer concurrently until either finishes
/// 4. Release the socket, purging any session bound to it
///
/// # Arguments
///
/// * `stream` - The plain or TLS stream for the client connection
/// * `addr` - The remote address of the client
/// * `registry` - Registry tracking sockets and sessions
/// * `router` - Dispatcher for inbound text frames
///
/// # Returns
///
/// `Ok(())` once the connection has been closed and released, or a
/// `GatewayError` if the handshake failed.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    router: Arc<CommandRouter>,
) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| GatewayError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (socket, mut outbound) = registry.track(addr).await;
    let connection_id = socket.id();

    let incoming_task = {
        let registry = registry.clone();
        let socket = socket.clone();
        async move {
            while let Some(msg) = ws_receiver.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                    Ok(Message::Ping(data)) => {
                        socket.pong(data.to_vec());
                        continue;
                    }
                    Ok(Message::Pong(_)) => {
                        registry.mark_alive(&socket).await;
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        debug!("🔌 Client {} requested close", connection_id);
                        break;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        debug!("WebSocket error for connection {}: {}", connection_id, e);
                        break;
                    }
                };

                let outcome = router.route(&socket, &text).await;
                trace!("Connection {}: {:?}", connection_id, outcome);
                if outcome.is_terminal() {
                    break;
                }
            }
        }
    };

    let outgoing_task = async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Vec::new().into()),
                Outbound::Pong(payload) => Message::Pong(payload.into()),
                Outbound::Terminate => {
                    if !close_within(&mut ws_sender, CLOSE_TIMEOUT).await {
                        debug!("Connection {} did not close cleanly, dropping it", connection_id);
                    }
                    break;
                }
            };
            if let Err(e) = ws_sender.send(message).await {
                debug!("Failed to write to connection {}: {}", connection_id, e);
                break;
            }
        }
    };

    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
    }

    registry.release(&socket).await;
    Ok(())
}

/// Sends a close frame, giving up after `limit`.
///
/// Returns `false` when the peer could not be closed in time or the close
/// failed; either way the caller drops the transport.
async fn close_within<W>(sink: &mut W, limit: Duration) -> bool
where
    W: Sink<Message> + Unpin,
{
    matches!(tokio::time::timeout(limit, sink.close()).await, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer whose send buffer never drains.
    struct StalledPeer;

    impl Sink<Message> for StalledPeer {
        type Error = std::io::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_on_stalled_peer() {
        let started = tokio::time::Instant::now();

        assert!(!close_within(&mut StalledPeer, CLOSE_TIMEOUT).await);
        assert!(started.elapsed() >= CLOSE_TIMEOUT);
        assert!(started.elapsed() < CLOSE_TIMEOUT * 2);
    }

    #[tokio::test]
    async fn test_close_succeeds_on_healthy_sink() {
        let mut sink = futures::sink::drain::<Message>();
        assert!(close_within(&mut sink, CLOSE_TIMEOUT).await);
    }
}
