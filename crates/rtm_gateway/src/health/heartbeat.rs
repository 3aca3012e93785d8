//! Transport-level liveness checks.

use super::expiry::ExpiryReaper;
use crate::connection::ConnectionRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// What one heartbeat tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub expired: usize,
    pub evicted: usize,
    pub pinged: usize,
}

/// Pings every socket each interval and closes those that stayed silent for a
/// whole interval. Each tick also runs the token expiry sweep.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    reaper: ExpiryReaper,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self {
            reaper: ExpiryReaper::new(registry.clone()),
            registry,
            interval,
        }
    }

    pub async fn tick(&self) -> HeartbeatReport {
        let expired = self.reaper.sweep(Utc::now()).await;

        let sweep = self.registry.sweep_unresponsive().await;
        for socket in &sweep.unresponsive {
            debug!("Connection {} missed its heartbeat", socket.id());
            self.registry.purge(socket, true).await;
        }
        for socket in &sweep.pinged {
            socket.ping();
        }

        HeartbeatReport {
            expired,
            evicted: sweep.unresponsive.len(),
            pinged: sweep.pinged.len(),
        }
    }

    /// Runs [`tick`](Self::tick) every interval until shutdown.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.tick().await;
                        if report.expired > 0 || report.evicted > 0 {
                            info!(
                                "💓 Heartbeat: {} expired, {} unresponsive, {} pinged",
                                report.expired, report.evicted, report.pinged
                            );
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Heartbeat monitor stopping");
                        break;
                    }
                }
            }
        })
    }
}
