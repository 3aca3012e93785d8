//! Connection tracking for WebSocket clients.
//!
//! Every accepted socket gets a [`SocketHandle`] and is tracked by the
//! [`ConnectionRegistry`] from open to close. Sockets that authenticate are
//! additionally bound to an identity; the registry keeps the identity,
//! socket, expiry and platform indexes consistent with each other.

pub mod client;
pub mod registry;
pub mod socket;

pub use client::{Connection, DevicePlatforms};
pub use registry::{ConnectionRegistry, HeartbeatSweep, RegistryCounts, TrafficSample};
pub use socket::{Outbound, SocketHandle};

/// Type alias for connection identifiers.
///
/// Connection IDs uniquely identify a socket for its whole lifetime on this
/// gateway instance and are never reused.
pub type ConnectionId = usize;
