//! Configuration management for the RTM gateway.
//!
//! This module handles loading, validation, and conversion of the gateway
//! configuration from a TOML file, the environment and command-line arguments.

use crate::cli::CliArgs;
use rtm_gateway::config::DEFAULT_PRODUCER_TOPIC;
use rtm_gateway::host::parse_iphost_map;
use rtm_gateway::{GatewayConfig, ServerMode, TlsSettings};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable that supplies (and overrides) the token secret.
pub const TOKEN_SECRET_ENV: &str = "RTM_TOKEN_SECRET";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_PROTOCOLS: [&str; 2] = ["http", "https"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub kafka: KafkaSettings,
    #[serde(default)]
    pub zookeeper: ZookeeperSettings,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub timers: TimerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener settings.
///
/// `websocket_protocol` is only advertised to the cluster; `server_mode`
/// decides whether the listener actually speaks TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub websocket_port: u16,
    pub websocket_protocol: String,
    pub server_mode: String,
    pub bind_host: String,
    /// `"dev"` enables the static file route when `http_route` is set
    pub environment: String,
    pub http_route: bool,
    pub static_dir: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            websocket_port: 8080,
            websocket_protocol: "http".to_string(),
            server_mode: "http".to_string(),
            bind_host: "0.0.0.0".to_string(),
            environment: "production".to_string(),
            http_route: false,
            static_dir: "client".to_string(),
            tls_cert_path: "ssl/server.pem".to_string(),
            tls_key_path: "ssl/server.key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret for identity tokens. Left empty in files; supply it through
    /// `RTM_TOKEN_SECRET`.
    pub token_secret: String,
}

/// Which transport carries bus traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Kafka,
    /// In-process bus; nothing leaves the gateway.
    Memory,
}

/// Which coordination service the node is announced to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryBackend {
    #[default]
    Zookeeper,
    /// In-process namespace; the node is invisible to the cluster.
    Memory,
}

/// Message bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    pub backend: BusBackend,
    /// Comma-separated `host:port` brokers
    pub kafka_host: String,
    pub producer_topic: String,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Kafka,
            kafka_host: "localhost:9092".to_string(),
            producer_topic: DEFAULT_PRODUCER_TOPIC.to_string(),
        }
    }
}

/// Service discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperSettings {
    pub backend: DiscoveryBackend,
    /// Ensemble connect string, optionally with a chroot suffix
    pub zoo_host: String,
    pub zoo_rtm_nodes: String,
    pub connect_timeout_secs: u64,
}

impl Default for ZookeeperSettings {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackend::Zookeeper,
            zoo_host: "localhost:2181".to_string(),
            zoo_rtm_nodes: "/rtm_nodes".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSettings {
    /// Advertised host, or `AWS_VPS` to look up the public IPv4
    pub deployment_host: String,
    /// `ip:host` pairs separated by commas
    pub websocket_iphost_map: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            deployment_host: "localhost".to_string(),
            websocket_iphost_map: String::new(),
        }
    }
}

/// Periodic task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub heartbeat_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub stats_timeout_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 25,
            stats_interval_secs: 30,
            stats_timeout_ms: 5000,
        }
    }
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file that receives a copy of every log line
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

impl LoggingSettings {
    /// The log file, treating an empty path as unset.
    pub fn log_file(&self) -> Option<&Path> {
        self.file_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(Path::new)
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is created.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies `RTM_TOKEN_SECRET` when it is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_secret_override(std::env::var(TOKEN_SECRET_ENV).ok());
    }

    fn apply_secret_override(&mut self, secret: Option<String>) {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.auth.token_secret = secret;
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.websocket_port = port;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the merged configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration can start a gateway, or a message naming
    /// the first offending setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth.token_secret.trim().is_empty() {
            return Err(format!(
                "auth.token_secret is empty; set it in the config file or via {TOKEN_SECRET_ENV}"
            ));
        }

        if self.server.websocket_port == 0 {
            return Err("server.websocket_port must be greater than 0".to_string());
        }

        if self.server.bind_host.parse::<IpAddr>().is_err() {
            return Err(format!("Invalid bind host: {}", self.server.bind_host));
        }

        if !VALID_PROTOCOLS.contains(&self.server.websocket_protocol.as_str()) {
            return Err(format!(
                "Invalid websocket_protocol: {}. Must be one of: {VALID_PROTOCOLS:?}",
                self.server.websocket_protocol
            ));
        }

        match ServerMode::parse(&self.server.server_mode) {
            None => {
                return Err(format!(
                    "Invalid server_mode: {}. Must be one of: {VALID_PROTOCOLS:?}",
                    self.server.server_mode
                ));
            }
            Some(ServerMode::Https)
                if self.server.tls_cert_path.trim().is_empty() || self.server.tls_key_path.trim().is_empty() =>
            {
                return Err("HTTPS server_mode requires tls_cert_path and tls_key_path".to_string());
            }
            Some(_) => {}
        }

        if self.timers.heartbeat_interval_secs == 0 {
            return Err("timers.heartbeat_interval_secs must be greater than 0".to_string());
        }
        if self.timers.stats_interval_secs == 0 {
            return Err("timers.stats_interval_secs must be greater than 0".to_string());
        }
        if self.timers.stats_timeout_ms == 0 {
            return Err("timers.stats_timeout_ms must be greater than 0".to_string());
        }
        if self.zookeeper.connect_timeout_secs == 0 {
            return Err("zookeeper.connect_timeout_secs must be greater than 0".to_string());
        }
        if self.kafka.backend == BusBackend::Kafka && self.kafka.kafka_host.trim().is_empty() {
            return Err("kafka.kafka_host is required for the kafka backend".to_string());
        }
        if self.zookeeper.backend == DiscoveryBackend::Zookeeper && self.zookeeper.zoo_host.trim().is_empty() {
            return Err("zookeeper.zoo_host is required for the zookeeper backend".to_string());
        }
        if !self.zookeeper.zoo_rtm_nodes.starts_with('/') {
            return Err(format!(
                "zookeeper.zoo_rtm_nodes must be an absolute path: {}",
                self.zookeeper.zoo_rtm_nodes
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        parse_iphost_map(&self.deployment.websocket_iphost_map).map_err(|e| e.to_string())?;

        Ok(())
    }

    /// Whether static assets are served next to the WebSocket endpoint.
    pub fn serves_static_files(&self) -> bool {
        self.server.environment == "dev" && self.server.http_route
    }

    /// Projects the file configuration onto the gateway's runtime config.
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
        let bind_ip: IpAddr = self.server.bind_host.parse()?;
        let server_mode = ServerMode::parse(&self.server.server_mode)
            .ok_or_else(|| format!("Invalid server_mode: {}", self.server.server_mode))?;

        let tls = (server_mode == ServerMode::Https).then(|| TlsSettings {
            cert_path: PathBuf::from(&self.server.tls_cert_path),
            key_path: PathBuf::from(&self.server.tls_key_path),
        });
        let static_dir = self
            .serves_static_files()
            .then(|| PathBuf::from(&self.server.static_dir));

        Ok(GatewayConfig {
            bind_address: SocketAddr::new(bind_ip, self.server.websocket_port),
            server_mode,
            tls,
            websocket_protocol: self.server.websocket_protocol.clone(),
            static_dir,
            token_secret: self.auth.token_secret.clone(),
            producer_topic: self.kafka.producer_topic.clone(),
            discovery_parent: self.zookeeper.zoo_rtm_nodes.clone(),
            discovery_connect_timeout: Duration::from_secs(self.zookeeper.connect_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.timers.heartbeat_interval_secs),
            stats_interval: Duration::from_secs(self.timers.stats_interval_secs),
            stats_timeout: Duration::from_millis(self.timers.stats_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.token_secret = "unit-test-secret".to_string();
        config
    }

    #[test]
    fn test_defaults_need_only_a_secret() {
        assert!(AppConfig::default().validate().unwrap_err().contains(TOKEN_SECRET_ENV));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_secret_override_ignores_empty_values() {
        let mut config = valid();
        config.apply_secret_override(Some(String::new()));
        assert_eq!(config.auth.token_secret, "unit-test-secret");

        config.apply_secret_override(Some("from-env".to_string()));
        assert_eq!(config.auth.token_secret, "from-env");

        config.apply_secret_override(None);
        assert_eq!(config.auth.token_secret, "from-env");
    }

    #[test]
    fn test_validation_errors() {
        let cases: [(&str, fn(&mut AppConfig)); 13] = [
            ("websocket_port", |c| c.server.websocket_port = 0),
            ("bind host", |c| c.server.bind_host = "not-an-ip".to_string()),
            ("websocket_protocol", |c| c.server.websocket_protocol = "wss".to_string()),
            ("server_mode", |c| c.server.server_mode = "tcp".to_string()),
            ("tls_cert_path", |c| {
                c.server.server_mode = "https".to_string();
                c.server.tls_key_path.clear();
            }),
            ("heartbeat_interval_secs", |c| c.timers.heartbeat_interval_secs = 0),
            ("stats_interval_secs", |c| c.timers.stats_interval_secs = 0),
            ("stats_timeout_ms", |c| c.timers.stats_timeout_ms = 0),
            ("log level", |c| c.logging.level = "verbose".to_string()),
            ("ip:host", |c| c.deployment.websocket_iphost_map = "10.0.0.1".to_string()),
            ("kafka_host", |c| c.kafka.kafka_host = " ".to_string()),
            ("zoo_host", |c| c.zookeeper.zoo_host.clear()),
            ("absolute path", |c| c.zookeeper.zoo_rtm_nodes = "rtm_nodes".to_string()),
        ];

        for (needle, breaks) in cases {
            let mut config = valid();
            breaks(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.contains(needle), "expected '{needle}' in '{err}'");
        }
    }

    #[test]
    fn test_memory_backends_need_no_cluster_hosts() {
        let mut config = valid();
        config.kafka.backend = BusBackend::Memory;
        config.kafka.kafka_host.clear();
        config.zookeeper.backend = DiscoveryBackend::Memory;
        config.zookeeper.zoo_host.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backends_parse_from_toml() {
        let config: AppConfig =
            toml::from_str("[kafka]\nbackend = \"memory\"\n\n[zookeeper]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.kafka.backend, BusBackend::Memory);
        assert_eq!(config.zookeeper.backend, DiscoveryBackend::Memory);

        let defaults: AppConfig = toml::from_str("").unwrap();
        assert_eq!(defaults.kafka.backend, BusBackend::Kafka);
        assert_eq!(defaults.zookeeper.backend, DiscoveryBackend::Zookeeper);

        assert!(toml::from_str::<AppConfig>("[kafka]\nbackend = \"redis\"\n").is_err());
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let mut config = valid();
        let args = CliArgs {
            config_path: PathBuf::from("config.toml"),
            port: Some(9001),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };
        config.apply_cli_overrides(&args);

        assert_eq!(config.server.websocket_port, 9001);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_to_gateway_config_projection() {
        let mut config = valid();
        config.server.bind_host = "127.0.0.1".to_string();
        config.server.websocket_port = 8443;
        config.server.server_mode = "https".to_string();
        config.timers.stats_timeout_ms = 1500;

        let gateway = config.to_gateway_config().unwrap();
        assert_eq!(gateway.bind_address, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(gateway.server_mode, ServerMode::Https);
        assert_eq!(gateway.tls.unwrap().cert_path, PathBuf::from("ssl/server.pem"));
        assert_eq!(gateway.stats_timeout, Duration::from_millis(1500));
        assert_eq!(gateway.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(gateway.discovery_parent, "/rtm_nodes");
        assert!(gateway.static_dir.is_none());
    }

    #[test]
    fn test_static_route_only_in_dev() {
        let mut config = valid();
        config.server.http_route = true;
        assert!(!config.serves_static_files());

        config.server.environment = "dev".to_string();
        let gateway = config.to_gateway_config().unwrap();
        assert_eq!(gateway.static_dir, Some(PathBuf::from("client")));
    }

    #[test]
    fn test_empty_log_file_path_is_unset() {
        let mut logging = LoggingSettings::default();
        assert!(logging.log_file().is_none());
        logging.file_path = Some("  ".to_string());
        assert!(logging.log_file().is_none());
        logging.file_path = Some("/var/log/rtm.log".to_string());
        assert_eq!(logging.log_file(), Some(Path::new("/var/log/rtm.log")));
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.websocket_port, 8080);
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.kafka.producer_topic, DEFAULT_PRODUCER_TOPIC);
        assert!(reloaded.auth.token_secret.is_empty());
    }

    #[tokio::test]
    async fn test_load_partial_file_fills_defaults() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        tokio::fs::write(
            &path,
            r#"
[server]
websocket_port = 9000
server_mode = "https"

[deployment]
deployment_host = "AWS_VPS"
websocket_iphost_map = "1.2.3.4:rtm1.example.com"

[logging]
level = "warn"
file_path = "/tmp/rtm.log"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.websocket_port, 9000);
        assert_eq!(config.server.server_mode, "https");
        assert_eq!(config.server.websocket_protocol, "http");
        assert_eq!(config.deployment.deployment_host, "AWS_VPS");
        assert_eq!(config.timers.stats_interval_secs, 30);
        assert_eq!(config.zookeeper.zoo_rtm_nodes, "/rtm_nodes");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.log_file(), Some(Path::new("/tmp/rtm.log")));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(&path, "[server\nwebsocket_port = ").await.unwrap();

        assert!(AppConfig::load_from_file(&path).await.is_err());
    }
}
