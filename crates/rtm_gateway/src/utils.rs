//! Utility functions and helper methods for the gateway.
//!
//! This module provides factory functions for creating gateway instances
//! wired to the host metrics collector.

use crate::bus::BusProducer;
use crate::config::GatewayConfig;
use crate::health::SysinfoMetrics;
use crate::server::GatewayServer;
use std::sync::Arc;

/// Creates a new gateway that reports real host metrics.
///
/// # Arguments
///
/// * `config` - A `GatewayConfig` instance with desired settings
/// * `host` - The resolved host name of this instance
/// * `producer` - A connected bus producer
///
/// # Returns
///
/// A new `GatewayServer` ready to bind.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use rtm_gateway::{bus::MemoryBus, create_gateway, GatewayConfig};
/// use std::sync::Arc;
///
/// let config = GatewayConfig {
///     token_secret: "from-the-environment".to_string(),
///     ..Default::default()
/// };
/// let gateway = create_gateway(config, "rtm1.example.com", Arc::new(MemoryBus::new()));
/// assert_eq!(gateway.consumer_topic(), "as_rtm_websockets_rtm1_example.com");
/// # }
/// ```
pub fn create_gateway(config: GatewayConfig, host: impl Into<String>, producer: Arc<dyn BusProducer>) -> GatewayServer {
    GatewayServer::new(config, host, producer, Arc::new(SysinfoMetrics::new()))
}
