//! # RTM Gateway Server - Main Entry Point
//!
//! Standalone binary for the real-time messaging WebSocket gateway. This
//! entry point handles CLI parsing, configuration loading, logging setup and
//! the application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (the secret always comes from outside)
//! RTM_TOKEN_SECRET=... rtm-server
//!
//! # Specify custom configuration
//! rtm-server --config production.toml
//!
//! # Override specific settings
//! rtm-server --port 9000 --log-level debug
//!
//! # JSON logging for production
//! rtm-server --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//! `RTM_TOKEN_SECRET` overrides `auth.token_secret`; command-line options
//! override both.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

pub use config::{LoggingSettings, ServerSettings};

/// Main entry point for the gateway binary.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading, overrides and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config = load_config(&args).await?;

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("❌ Configuration validation failed: {e}");
        return Err(format!("Configuration validation failed: {e}").into());
    }

    logging::display_banner();

    let app = Application::new(config).await.map_err(|e| {
        error!("❌ Failed to start application: {e}");
        e
    })?;
    if let Err(e) = app.run().await {
        error!("❌ Application error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

/// Loads the configuration file and layers the environment and CLI on top.
pub async fn load_config(args: &CliArgs) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_env_overrides();
    config.apply_cli_overrides(args);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_config_applies_cli_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[server]\nwebsocket_port = 7000\n\n[logging]\nlevel = \"warn\"\n")
            .await
            .unwrap();

        let args = CliArgs::try_parse_from([
            "rtm-server".to_string(),
            "-c".to_string(),
            path.display().to_string(),
            "-p".to_string(),
            "7100".to_string(),
        ])
        .unwrap();
        let config = load_config(&args).await.unwrap();

        assert_eq!(config.server.websocket_port, 7100);
        assert_eq!(config.logging.level, "warn");
        assert!(!config.logging.json_format);
    }

    #[tokio::test]
    async fn test_written_default_config_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.toml");

        let written = AppConfig::load_from_file(&path).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();

        assert_eq!(parsed.server.websocket_port, written.server.websocket_port);
        assert_eq!(parsed.zookeeper.zoo_host, written.zookeeper.zoo_host);
        assert!(content.contains("[timers]"));
        assert!(!content.contains("file_path"));
    }
}
