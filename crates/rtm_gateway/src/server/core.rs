//! Core gateway server implementation.
//!
//! This module contains the `GatewayServer` struct, which owns the shared
//! components (registry, router, publisher) and drives the accept loop, the
//! periodic health tasks and the bus delivery relay.

use crate::auth::TokenValidator;
use crate::bus::{BusProducer, BusPublisher, DeliveryRelay};
use crate::config::{consumer_topic_for, GatewayConfig, ServerMode};
use crate::connection::ConnectionRegistry;
use crate::discovery::NodeDescriptor;
use crate::error::GatewayError;
use crate::health::{HeartbeatMonitor, HostMetricsSource, StatsReporter};
use crate::messaging::CommandRouter;
use crate::server::handlers::handle_connection;
use crate::server::static_files::StaticFiles;
use crate::server::tls::load_acceptor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The core gateway structure.
///
/// `GatewayServer` terminates client WebSocket connections, authenticates
/// them, relays whitelisted commands to the bus, and delivers bus messages
/// back to the right socket.
///
/// # Architecture
///
/// * **Connection Registry**: Socket tracking and identity indexes
/// * **Command Router**: Auth, application ping, and command relay
/// * **Bus Publisher**: Stamped envelopes onto the producer topic
/// * **Health Tasks**: Heartbeat with expiry sweep, and stats telemetry
pub struct GatewayServer {
    /// Gateway configuration settings
    config: GatewayConfig,

    /// Host name advertised to the cluster and stamped on envelopes
    host: String,

    /// Topic this instance consumes deliveries from
    consumer_topic: String,

    publisher: Arc<BusPublisher>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<CommandRouter>,
    metrics: Arc<dyn HostMetricsSource>,

    /// Channel for coordinating gateway shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl GatewayServer {
    /// Creates a new gateway with the provided configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Gateway configuration
    /// * `host` - Resolved host name of this instance
    /// * `producer` - Connected bus producer
    /// * `metrics` - Source of host metrics for the stats report
    pub fn new(
        config: GatewayConfig,
        host: impl Into<String>,
        producer: Arc<dyn BusProducer>,
        metrics: Arc<dyn HostMetricsSource>,
    ) -> Self {
        let host = host.into();
        let consumer_topic = consumer_topic_for(&host);
        let publisher = Arc::new(BusPublisher::new(producer, config.producer_topic.clone(), host.clone()));
        let registry = Arc::new(ConnectionRegistry::new(publisher.clone()));
        let router = Arc::new(CommandRouter::new(
            registry.clone(),
            TokenValidator::new(&config.token_secret),
            publisher.clone(),
        ));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config,
            host,
            consumer_topic,
            publisher,
            registry,
            router,
            metrics,
            shutdown_sender,
        }
    }

    /// Binds the WebSocket listener to the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| GatewayError::Network(format!("Failed to bind to {}: {e}", self.config.bind_address)))
    }

    /// Binds and serves until shutdown.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on `listener` until shutdown is requested.
    ///
    /// Each accepted connection is handled on its own task; a failure in one
    /// connection never affects the others or the accept loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let tls = match self.config.server_mode {
            ServerMode::Https => {
                let settings = self.config.tls.as_ref().ok_or_else(|| {
                    GatewayError::Config("HTTPS mode requires tls_cert_path and tls_key_path".to_string())
                })?;
                Some(load_acceptor(settings)?)
            }
            ServerMode::Http => None,
        };
        let static_files = match (&tls, &self.config.static_dir) {
            (None, Some(dir)) => {
                info!("HTTP Route is ENABLED, serving {}", dir.display());
                Some(StaticFiles::new(dir))
            }
            (Some(_), Some(_)) => {
                warn!("Static files are only served in HTTP mode, HTTP Route is DISABLED");
                None
            }
            _ => None,
        };

        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        info!(
            "🚀 RTM gateway listening on {} ({:?}) as {}",
            local_addr, self.config.server_mode, self.host
        );

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((mut stream, addr)) => {
                        let registry = self.registry.clone();
                        let router = self.router.clone();
                        let tls = tls.clone();
                        let static_files = static_files.clone();
                        tokio::spawn(async move {
                            let result = match tls {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => handle_connection(tls_stream, addr, registry, router).await,
                                    Err(e) => Err(GatewayError::Network(format!("TLS handshake failed: {e}"))),
                                },
                                None => {
                                    if let Some(files) = static_files {
                                        match files.try_serve(&mut stream).await {
                                            Ok(true) => return,
                                            Ok(false) => {}
                                            Err(e) => {
                                                debug!("Static request from {} failed: {}", addr, e);
                                                return;
                                            }
                                        }
                                    }
                                    handle_connection(stream, addr, registry, router).await
                                }
                            };
                            if let Err(e) = result {
                                debug!("Connection from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_receiver.recv() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawns the heartbeat (with expiry sweep) and stats timers.
    pub fn start_timers(&self) -> Vec<JoinHandle<()>> {
        let heartbeat = HeartbeatMonitor::new(self.registry.clone(), self.config.heartbeat_interval);
        let stats = StatsReporter::new(
            self.registry.clone(),
            self.publisher.clone(),
            self.metrics.clone(),
            self.consumer_topic.clone(),
            self.config.stats_interval,
            self.config.stats_timeout,
        );
        info!(
            "💓 Heartbeat every {:?}, 📊 stats every {:?}",
            self.config.heartbeat_interval, self.config.stats_interval
        );
        vec![
            heartbeat.spawn(self.shutdown_sender.subscribe()),
            stats.spawn(self.shutdown_sender.subscribe()),
        ]
    }

    /// Spawns the relay from the consumer stream to client sockets.
    pub fn start_delivery(&self, messages: mpsc::Receiver<String>) -> JoinHandle<()> {
        let relay = DeliveryRelay::new(self.registry.clone());
        tokio::spawn(relay.run(messages, self.shutdown_sender.subscribe()))
    }

    /// Describes this instance for discovery, given the port actually bound.
    pub fn node_descriptor(&self, port: u16) -> NodeDescriptor {
        NodeDescriptor {
            protocol: self.config.websocket_protocol.clone(),
            host: self.host.clone(),
            port,
            consumer_topic: self.consumer_topic.clone(),
        }
    }

    /// Initiates gateway shutdown.
    ///
    /// Stops the accept loop and timers, then closes every open socket.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down gateway...");
        let _ = self.shutdown_sender.send(());
        self.registry.terminate_all().await;
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_sender.subscribe()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn consumer_topic(&self) -> &str {
        &self.consumer_topic
    }

    /// Gets the connection registry.
    pub fn get_registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn get_router(&self) -> Arc<CommandRouter> {
        self.router.clone()
    }

    pub fn get_publisher(&self) -> Arc<BusPublisher> {
        self.publisher.clone()
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("bind_address", &self.config.bind_address)
            .field("host", &self.host)
            .field("consumer_topic", &self.consumer_topic)
            .finish_non_exhaustive()
    }
}
