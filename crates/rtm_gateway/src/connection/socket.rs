//! Handle onto one live transport connection.

use super::ConnectionId;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Transport-level liveness ping.
    Ping,
    /// Reply to a client's transport ping, echoing its payload.
    Pong(Vec<u8>),
    /// Close the connection immediately.
    Terminate,
}

/// Cloneable handle used by the registry, router and timers to reach a socket.
///
/// The handle never touches the transport itself; it only queues [`Outbound`]
/// frames for the connection's writer task. Sends to a socket whose writer has
/// gone away are silently dropped.
#[derive(Clone)]
pub struct SocketHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle {
    /// Creates a handle and the receiving end its writer task drains.
    pub fn new(id: ConnectionId, remote_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                remote_addr,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queues a text frame. Returns `false` if the connection is already gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(Outbound::Text(text.into())).is_ok()
    }

    pub fn ping(&self) -> bool {
        self.tx.send(Outbound::Ping).is_ok()
    }

    pub fn pong(&self, payload: Vec<u8>) -> bool {
        self.tx.send(Outbound::Pong(payload)).is_ok()
    }

    pub fn terminate(&self) {
        let _ = self.tx.send(Outbound::Terminate);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SocketHandle {}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
