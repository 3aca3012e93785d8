//! # RTM Gateway - Real-Time Messaging Edge
//!
//! A horizontally scalable WebSocket gateway that sits between end-user
//! clients and a backend message bus. Each instance terminates client
//! connections, authenticates them with signed identity tokens, forwards a
//! whitelisted set of client commands to the bus, and delivers bus messages
//! back to the socket of the addressed user.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Connection Registry** - Every open socket, plus the identity, socket,
//!   expiry and platform indexes of authenticated sessions
//! * **Command Router** - `ws_auth`, `ws_ping`, and relay of whitelisted commands
//! * **Bus Publisher** - Stamped, prefixed envelopes onto the producer topic
//! * **Delivery Relay** - Bus deliveries to the socket holding the identity
//! * **Health Tasks** - Heartbeat with token expiry sweep, and `ws_stats` telemetry
//! * **Node Announcer** - Ephemeral discovery node advertising this instance
//!
//! ### Message Flow
//!
//! 1. Client connects and sends `{"command":"ws_auth","auth_token":"..."}`
//! 2. The token is verified and the socket is bound to `{user_id}_{finger_print}`
//! 3. `ws_cache_connection` is published so dispatchers know where the user lives
//! 4. Whitelisted client commands are stamped and published to the bus
//! 5. Deliveries on `as_rtm_websockets_{host}` are forwarded to the right socket
//!
//! ## External Collaborators
//!
//! The bus and the discovery service are reached through the
//! [`bus::BusProducer`]/[`bus::BusConsumer`] and
//! [`discovery::DiscoveryClient`] traits. [`bus::KafkaBus`] and
//! [`discovery::ZkDiscovery`] talk to real clusters; the in-memory
//! implementations serve tests and single-node runs.
//!
//! ## Error Handling
//!
//! Failures are grouped by collaborator in [`GatewayError`]. Nothing that goes
//! wrong on one connection escapes that connection's task.

pub use config::{GatewayConfig, ServerMode, TlsSettings};
pub use error::GatewayError;
pub use server::GatewayServer;
pub use utils::create_gateway;

pub mod auth;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod health;
pub mod host;
pub mod messaging;
pub mod server;
pub mod utils;

#[cfg(test)]
mod tests;
