//! Periodic `ws_stats` telemetry.

use super::metrics::{HostMetrics, HostMetricsSource};
use crate::bus::BusPublisher;
use crate::connection::ConnectionRegistry;
use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// One telemetry snapshot, published as-is on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub command: String,
    pub active_connections: usize,
    pub sent_total: u64,
    pub received_total: u64,
    /// Messages per second over the last interval, rounded up.
    pub send_rate: u64,
    pub receive_rate: u64,
    /// Cumulative protocol and auth errors.
    pub errors: u64,
    #[serde(flatten)]
    pub host_metrics: HostMetrics,
    pub os_ip: String,
    pub os_hostname: String,
    pub kafka_consumer_topic: String,
    pub android_clients: usize,
    pub ios_clients: usize,
}

/// Builds and publishes a [`StatsSnapshot`] every interval.
pub struct StatsReporter {
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<BusPublisher>,
    metrics: Arc<dyn HostMetricsSource>,
    consumer_topic: String,
    interval: Duration,
    collect_timeout: Duration,
    sent_total: AtomicU64,
    received_total: AtomicU64,
}

impl StatsReporter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        publisher: Arc<BusPublisher>,
        metrics: Arc<dyn HostMetricsSource>,
        consumer_topic: impl Into<String>,
        interval: Duration,
        collect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            publisher,
            metrics,
            consumer_topic: consumer_topic.into(),
            interval,
            collect_timeout,
            sent_total: AtomicU64::new(0),
            received_total: AtomicU64::new(0),
        }
    }

    /// Takes the interval counters, collects host metrics, and publishes.
    ///
    /// The counters are taken before metrics are collected, so a failed or
    /// timed-out collection loses that interval's rates but never double counts.
    pub async fn tick(&self) -> Result<StatsSnapshot, StatsError> {
        let traffic = self.registry.take_traffic();
        let sent_total = self.sent_total.fetch_add(traffic.sent, Ordering::Relaxed) + traffic.sent;
        let received_total =
            self.received_total.fetch_add(traffic.received, Ordering::Relaxed) + traffic.received;

        let host_metrics = tokio::time::timeout(self.collect_timeout, self.metrics.collect())
            .await
            .map_err(|_| StatsError::Timeout)??;

        let counts = self.registry.counts().await;
        let interval_secs = self.interval.as_secs().max(1);
        let host = self.publisher.host().to_string();
        let snapshot = StatsSnapshot {
            command: "ws_stats".to_string(),
            active_connections: counts.active,
            sent_total,
            received_total,
            send_rate: traffic.sent.div_ceil(interval_secs),
            receive_rate: traffic.received.div_ceil(interval_secs),
            errors: traffic.errors,
            host_metrics,
            os_ip: host.clone(),
            os_hostname: host,
            kafka_consumer_topic: self.consumer_topic.clone(),
            android_clients: counts.android,
            ios_clients: counts.ios,
        };

        match serde_json::to_value(&snapshot) {
            Ok(Value::Object(body)) => self.publisher.publish_system(body).await,
            Ok(_) => return Err(StatsError::Collection("snapshot is not an object".to_string())),
            Err(e) => return Err(StatsError::Collection(e.to_string())),
        }
        Ok(snapshot)
    }

    /// Runs [`tick`](Self::tick) every interval until shutdown.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(snapshot) => debug!(
                                "📊 Stats: {} active, {} msg/s out, {} msg/s in",
                                snapshot.active_connections, snapshot.send_rate, snapshot.receive_rate
                            ),
                            Err(e) => warn!("Skipping stats snapshot: {}", e),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for StatsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsReporter")
            .field("consumer_topic", &self.consumer_topic)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::test_support::{claims, registry_with_bus, test_addr, FixedMetrics, StalledMetrics};
    use serde_json::json;

    fn reporter(
        registry: Arc<ConnectionRegistry>,
        bus: Arc<MemoryBus>,
        metrics: Arc<dyn HostMetricsSource>,
    ) -> StatsReporter {
        let publisher = Arc::new(BusPublisher::new(bus, "bg", "10.0.0.7"));
        StatsReporter::new(
            registry,
            publisher,
            metrics,
            "as_rtm_websockets_10_0_0_7",
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_snapshot_rates_round_up_and_totals_accumulate() {
        let (registry, bus) = registry_with_bus().await;
        let (socket, _rx) = registry.track(test_addr()).await;
        let identity = registry
            .register(&socket, claims("1", "a", "App iOS 17"))
            .await
            .unwrap();
        for _ in 0..31 {
            registry.send_to_identity(&identity, "x".to_string()).await;
        }
        for _ in 0..5 {
            registry.record_received();
        }
        registry.record_error();
        let stats = reporter(registry.clone(), bus.clone(), Arc::new(FixedMetrics));

        let first = stats.tick().await.unwrap();
        assert_eq!(first.send_rate, 2);
        assert_eq!(first.receive_rate, 1);
        assert_eq!(first.sent_total, 31);
        assert_eq!(first.errors, 1);
        assert_eq!(first.active_connections, 1);
        assert_eq!(first.ios_clients, 1);

        registry.send_to_identity(&identity, "x".to_string()).await;
        let second = stats.tick().await.unwrap();
        assert_eq!(second.send_rate, 1);
        assert_eq!(second.sent_total, 32);
        assert_eq!(second.received_total, 5);
        assert_eq!(second.receive_rate, 0);
        assert_eq!(second.errors, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_published_with_flat_field_names() {
        let (registry, bus) = registry_with_bus().await;
        let stats = reporter(registry, bus.clone(), Arc::new(FixedMetrics));

        stats.tick().await.unwrap();

        let published = bus.published_with_command("ws_stats").await;
        assert_eq!(published.len(), 1);
        let body = &published[0];
        assert_eq!(body["source"], json!("websocket_server"));
        assert_eq!(body["host"], json!("10.0.0.7"));
        assert_eq!(body["os_hostname"], json!("10.0.0.7"));
        assert_eq!(body["kafka_consumer_topic"], json!("as_rtm_websockets_10_0_0_7"));
        assert_eq!(body["cpu_usage_percent"], json!(12.5));
        assert_eq!(body["mem_total_mb"], json!(2048.0));
        assert!(body.get("host_metrics").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_metrics_skip_the_snapshot() {
        let (registry, bus) = registry_with_bus().await;
        let stats = reporter(registry, bus.clone(), Arc::new(StalledMetrics));

        let result = stats.tick().await;

        assert!(matches!(result, Err(StatsError::Timeout)));
        assert!(bus.published_with_command("ws_stats").await.is_empty());
    }
}
