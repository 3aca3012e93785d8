//! Core server implementation and connection handling.
//!
//! This module contains the gateway server structure, the per-connection
//! handler, TLS setup for HTTPS mode, and the development static file route.

pub mod core;
pub mod handlers;
pub mod static_files;
pub mod tls;

pub use core::GatewayServer;
