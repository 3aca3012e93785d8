//! Host resource metrics for the periodic stats report.

use crate::error::StatsError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use sysinfo::{Disks, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time host resource figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_usage_percent: f64,
    pub cpu_free_percent: f64,
    pub disk_total_gb: f64,
    pub disk_free_gb: f64,
    pub mem_total_mb: f64,
    pub mem_free_mb: f64,
    pub os_info: String,
    /// Seconds since boot.
    pub os_uptime: u64,
    pub os_platform: String,
}

/// Source of host metrics; collection may block or fail.
#[async_trait]
pub trait HostMetricsSource: Send + Sync {
    async fn collect(&self) -> Result<HostMetrics, StatsError>;
}

/// Collects host metrics through `sysinfo` on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct SysinfoMetrics {
    system: Arc<Mutex<System>>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostMetricsSource for SysinfoMetrics {
    async fn collect(&self) -> Result<HostMetrics, StatsError> {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || -> Result<HostMetrics, StatsError> {
            let mut sys = system
                .lock()
                .map_err(|_| StatsError::Collection("system handle poisoned".to_string()))?;
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let cpu_usage = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
            let disks = Disks::new_with_refreshed_list();
            let (disk_total, disk_free) = disks
                .list()
                .iter()
                .fold((0u64, 0u64), |(total, free), disk| {
                    (total + disk.total_space(), free + disk.available_space())
                });

            Ok(HostMetrics {
                cpu_usage_percent: round2(cpu_usage),
                cpu_free_percent: round2(100.0 - cpu_usage),
                disk_total_gb: round2(disk_total as f64 / BYTES_PER_GB),
                disk_free_gb: round2(disk_free as f64 / BYTES_PER_GB),
                mem_total_mb: round2(sys.total_memory() as f64 / BYTES_PER_MB),
                mem_free_mb: round2(sys.available_memory() as f64 / BYTES_PER_MB),
                os_info: System::long_os_version()
                    .or_else(System::name)
                    .unwrap_or_else(|| "unknown".to_string()),
                os_uptime: System::uptime(),
                os_platform: std::env::consts::OS.to_string(),
            })
        })
        .await
        .map_err(|e| StatsError::Collection(format!("metrics task failed: {e}")))?
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
