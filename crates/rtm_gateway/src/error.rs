//! Error types and handling for the gateway.
//!
//! This module defines the error types that can occur during gateway operations,
//! grouped by the collaborator that produced them so callers can decide whether
//! a failure is local to one socket, fatal at startup, or merely logged.

/// Enumeration of possible gateway errors.
///
/// Failures inside one connection's handling never escape that connection;
/// this type is mostly seen at startup and at the seams to external services.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network-related errors such as binding failures or handshake issues
    #[error("Network error: {0}")]
    Network(String),

    /// Internal errors that indicate a broken invariant or failed task
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token verification failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The message bus rejected or could not carry a message
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The service-discovery backend is unreachable or refused an operation
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Reasons an identity token can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The signature does not match the configured secret
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token could not be decoded or lacks a required claim
    #[error("token is malformed: {0}")]
    Malformed(String),

    /// The token's expiry claim is already in the past
    #[error("token has expired")]
    Expired,
}

/// Errors raised by a bus transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The broker could not be reached
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A single publish failed
    #[error("publish failed: {0}")]
    Publish(String),

    /// The transport has been shut down
    #[error("bus connection closed")]
    Closed,
}

/// Errors raised by a service-discovery backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery ensemble could not be reached
    #[error("discovery service unavailable: {0}")]
    Unavailable(String),

    /// No session was established within the connect timeout
    #[error("discovery service did not respond in time")]
    Timeout,

    /// A node already exists at the path
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node or its parent does not exist
    #[error("no such node: {0}")]
    NoNode(String),

    /// Any other backend failure
    #[error("discovery operation failed: {0}")]
    Operation(String),
}

/// Errors raised while collecting a stats snapshot. Never fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StatsError {
    /// Host metric collection exceeded its budget
    #[error("host metric collection timed out")]
    Timeout,

    /// Host metric collection failed outright
    #[error("host metric collection failed: {0}")]
    Collection(String),
}
