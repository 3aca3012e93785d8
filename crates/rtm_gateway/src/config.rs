//! Gateway configuration types and defaults.
//!
//! This module contains the runtime configuration structure used to initialize
//! the gateway. The application crate builds it from its TOML file and CLI
//! overrides; tests build it directly.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed identifier stamped as `source` on every bus envelope.
///
/// Downstream dispatchers match on this literal, so it is not configurable.
pub const SOURCE_ID: &str = "websocket_server";

/// Topic the gateway produces envelopes onto unless configured otherwise.
pub const DEFAULT_PRODUCER_TOPIC: &str = "as_parallel_bg_queue_low_priority";

/// Transport the WebSocket listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Plain TCP
    Http,
    /// TLS via rustls
    Https,
}

impl ServerMode {
    /// Parses a configuration string (`"http"` or `"https"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

/// PEM files used when the listener runs in [`ServerMode::Https`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The socket address the WebSocket listener binds to
    pub bind_address: SocketAddr,

    /// Plain or TLS transport
    pub server_mode: ServerMode,

    /// Certificate material, required when `server_mode` is HTTPS
    pub tls: Option<TlsSettings>,

    /// Protocol advertised in the discovery node path (`http` or `https`)
    pub websocket_protocol: String,

    /// Directory served to plain HTTP requests; `None` disables static serving
    pub static_dir: Option<PathBuf>,

    /// HMAC secret used to verify identity tokens
    pub token_secret: String,

    /// Topic that receives every envelope the gateway publishes
    pub producer_topic: String,

    /// Parent path under which this instance announces itself
    pub discovery_parent: String,

    /// How long to wait for a discovery session before giving up on an attempt
    pub discovery_connect_timeout: Duration,

    /// Heartbeat (and expiry sweep) interval
    pub heartbeat_interval: Duration,

    /// Stats snapshot interval
    pub stats_interval: Duration,

    /// Budget for host metric collection within one stats tick
    pub stats_timeout: Duration,
}

impl GatewayConfig {
    /// Stats interval in whole seconds, never zero.
    pub fn stats_interval_secs(&self) -> u64 {
        self.stats_interval.as_secs().max(1)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            server_mode: ServerMode::Http,
            tls: None,
            websocket_protocol: "http".to_string(),
            static_dir: None,
            token_secret: String::new(),
            producer_topic: DEFAULT_PRODUCER_TOPIC.to_string(),
            discovery_parent: "/rtm_nodes".to_string(),
            discovery_connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(25),
            stats_interval: Duration::from_secs(30),
            stats_timeout: Duration::from_secs(5),
        }
    }
}

/// Builds the topic this instance consumes deliveries from.
///
/// Only the first dot of the host becomes an underscore. Dispatchers and
/// existing topics already use names of this shape.
pub fn consumer_topic_for(host: &str) -> String {
    format!("as_rtm_websockets_{host}").replacen('.', "_", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_topic_replaces_only_the_first_dot() {
        assert_eq!(consumer_topic_for("10.0.1.7"), "as_rtm_websockets_10_0.1.7");
        assert_eq!(consumer_topic_for("rtm1.example.com"), "as_rtm_websockets_rtm1_example.com");
        assert_eq!(consumer_topic_for("rtm1"), "as_rtm_websockets_rtm1");
    }

    #[test]
    fn test_server_mode_parse() {
        assert_eq!(ServerMode::parse("http"), Some(ServerMode::Http));
        assert_eq!(ServerMode::parse("https"), Some(ServerMode::Https));
        assert_eq!(ServerMode::parse("HTTPS"), None);
    }

    #[test]
    fn test_default_timer_intervals() {
        let config = GatewayConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.stats_interval_secs(), 30);
        assert_eq!(config.producer_topic, DEFAULT_PRODUCER_TOPIC);
    }
}
