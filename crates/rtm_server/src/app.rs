//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that brings the gateway's
//! collaborators up in dependency order, waits for a termination signal, and
//! tears everything down again.

use crate::config::{AppConfig, BusBackend, DiscoveryBackend};
use crate::signals::{setup_signal_handlers, setup_signal_handlers_silent};
use futures::future::join_all;
use rtm_gateway::backoff::{retry_until_ready, ExponentialBackoff};
use rtm_gateway::bus::{BusConsumer, BusProducer, KafkaBus, MemoryBus};
use rtm_gateway::discovery::{DiscoveryClient, MemoryDiscovery, NodeAnnouncer, ZkDiscovery};
use rtm_gateway::host::{parse_iphost_map, resolve_host};
use rtm_gateway::{create_gateway, GatewayConfig, GatewayServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long background tasks get to finish after shutdown is broadcast.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

/// The bus and discovery backends the gateway runs against.
#[derive(Clone)]
pub struct Backends {
    pub producer: Arc<dyn BusProducer>,
    pub consumer: Arc<dyn BusConsumer>,
    pub discovery: Arc<dyn DiscoveryClient>,
}

impl Backends {
    /// Builds the backends named in the configuration. Nothing is dialed yet.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let (producer, consumer): (Arc<dyn BusProducer>, Arc<dyn BusConsumer>) = match config.kafka.backend {
            BusBackend::Kafka => {
                let bus = Arc::new(KafkaBus::new(&config.kafka.kafka_host)?);
                (bus.clone(), bus)
            }
            BusBackend::Memory => {
                warn!("Using the in-memory bus; nothing is published to the cluster");
                let bus = Arc::new(MemoryBus::new());
                (bus.clone(), bus)
            }
        };
        let discovery: Arc<dyn DiscoveryClient> = match config.zookeeper.backend {
            DiscoveryBackend::Zookeeper => Arc::new(ZkDiscovery::new(config.zookeeper.zoo_host.clone())),
            DiscoveryBackend::Memory => {
                warn!("Using in-memory discovery; this node is not announced to the cluster");
                Arc::new(MemoryDiscovery::new())
            }
        };
        Ok(Self {
            producer,
            consumer,
            discovery,
        })
    }

    /// Both bus roles served by one in-memory bus.
    pub fn in_memory(bus: Arc<MemoryBus>, discovery: Arc<MemoryDiscovery>) -> Self {
        Self {
            producer: bus.clone(),
            consumer: bus,
            discovery,
        }
    }
}

/// Main application struct.
///
/// Owns the runtime configuration, the resolved host name and the bus and
/// discovery backends until [`start`](Self::start) hands them to the gateway.
pub struct Application {
    gateway_config: GatewayConfig,
    host: String,
    backends: Backends,
}

/// A started gateway and the tasks serving it.
pub struct RunningGateway {
    server: Arc<GatewayServer>,
    local_addr: SocketAddr,
    announcer: Arc<NodeAnnouncer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Creates a new application instance from a validated configuration.
    ///
    /// Resolves the advertised host once; every envelope and the discovery
    /// node use the same value for the life of the process.
    ///
    /// # Arguments
    ///
    /// * `config` - Merged file, environment and CLI configuration
    ///
    /// # Returns
    ///
    /// A configured `Application` ready to start, or an error if the host
    /// could not be resolved, the configuration cannot be projected or a
    /// backend cannot be built.
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let iphost_map = parse_iphost_map(&config.deployment.websocket_iphost_map)?;
        let host = resolve_host(&config.deployment.deployment_host, &iphost_map).await?;
        let gateway_config = config.to_gateway_config()?;
        let backends = Backends::from_config(&config)?;

        log_configuration_summary(&config, &host);

        Ok(Self::from_parts(gateway_config, host, backends))
    }

    /// Assembles an application from already-built parts.
    pub fn from_parts(
        gateway_config: GatewayConfig,
        host: impl Into<String>,
        backends: Backends,
    ) -> Self {
        Self {
            gateway_config,
            host: host.into(),
            backends,
        }
    }

    /// Brings the gateway up.
    ///
    /// # Process
    ///
    /// 1. Connect the bus producer, retrying with backoff
    /// 2. Bind the listener and start accepting connections
    /// 3. Subscribe to this instance's topic and start the delivery relay
    /// 4. Announce the node to discovery, retrying with backoff
    /// 5. Start the heartbeat and stats timers
    pub async fn start(self) -> Result<RunningGateway, Box<dyn std::error::Error>> {
        let producer = self.backends.producer.clone();
        retry_until_ready("bus producer", ExponentialBackoff::for_startup(), || {
            let producer = producer.clone();
            async move { producer.connect().await }
        })
        .await;
        info!("🔗 Connected to message bus");

        let server = Arc::new(create_gateway(self.gateway_config, self.host, self.backends.producer.clone()));
        let listener = server.bind().await?;
        let local_addr = listener.local_addr()?;

        let mut tasks = Vec::new();
        let serving = server.clone();
        tasks.push(tokio::spawn(async move {
            match serving.serve(listener).await {
                Ok(()) => info!("✅ Accept loop completed"),
                Err(e) => {
                    error!("❌ Server error: {}", e);
                    std::process::exit(1);
                }
            }
        }));

        let consumer = self.backends.consumer.clone();
        let topic = server.consumer_topic().to_string();
        let deliveries = retry_until_ready("bus consumer", ExponentialBackoff::for_startup(), || {
            let consumer = consumer.clone();
            let topic = topic.clone();
            async move { consumer.subscribe(&topic).await }
        })
        .await;
        info!("📨 Consuming deliveries from {}", topic);
        tasks.push(server.start_delivery(deliveries));

        let announcer = Arc::new(NodeAnnouncer::new(
            self.backends.discovery.clone(),
            server.config().discovery_parent.clone(),
            server.node_descriptor(local_addr.port()),
            server.config().discovery_connect_timeout,
        ));
        let establishing = announcer.clone();
        let events = retry_until_ready("discovery", ExponentialBackoff::for_startup(), || {
            let announcer = establishing.clone();
            async move { announcer.establish().await }
        })
        .await;
        info!("📍 Announced as {}", announcer.node_path());
        tasks.push(tokio::spawn(announcer.clone().run(events, server.subscribe_shutdown())));

        tasks.extend(server.start_timers());

        Ok(RunningGateway {
            server,
            local_addr,
            announcer,
            tasks,
        })
    }

    /// Runs the gateway until a termination signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting RTM gateway");
        let running = self.start().await?;

        info!("✅ RTM gateway is now running on {}", running.local_addr());
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        // A second signal skips the graceful path.
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again, exiting immediately");
            std::process::exit(1);
        });

        running.stop().await;
        info!("👋 RTM gateway shutdown complete");
        Ok(())
    }
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self) -> Arc<GatewayServer> {
        self.server.clone()
    }

    pub fn node_path(&self) -> String {
        self.announcer.node_path()
    }

    /// Broadcasts shutdown, closes every socket and waits for the tasks.
    ///
    /// The discovery task withdraws the node as part of stopping.
    pub async fn stop(self) {
        self.server.shutdown().await;

        info!("⏳ Waiting for {} background task(s) to finish...", self.tasks.len());
        match tokio::time::timeout(SHUTDOWN_GRACE, join_all(self.tasks)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    warn!("Background task ended abnormally: {}", result);
                }
                info!("✅ Background tasks completed");
            }
            Err(_) => warn!("⏰ Background tasks did not finish within {:?}", SHUTDOWN_GRACE),
        }
    }
}

fn log_configuration_summary(config: &AppConfig, host: &str) {
    info!("📋 Configuration Summary:");
    info!(
        "  🌐 Listen: {}:{} ({}, advertised as {})",
        config.server.bind_host,
        config.server.websocket_port,
        config.server.server_mode,
        config.server.websocket_protocol
    );
    info!("  🏷️ Host: {}", host);
    info!(
        "  📨 Bus: {:?} {} -> {}",
        config.kafka.backend, config.kafka.kafka_host, config.kafka.producer_topic
    );
    info!(
        "  📍 Discovery: {:?} {}{}",
        config.zookeeper.backend, config.zookeeper.zoo_host, config.zookeeper.zoo_rtm_nodes
    );
    info!(
        "  ⏱️ Heartbeat {}s | Stats {}s",
        config.timers.heartbeat_interval_secs, config.timers.stats_interval_secs
    );
    if config.serves_static_files() {
        info!("  📁 HTTP Route is ENABLED ({})", config.server.static_dir);
    }
}
