//! Periodic health tasks: liveness pings, token expiry, and telemetry.
//!
//! Each task is a plain struct with an async `tick` that does one pass and a
//! `spawn` that runs it on an interval until shutdown. Failures inside a tick
//! are logged and never stop the timer.

pub mod expiry;
pub mod heartbeat;
pub mod metrics;
pub mod stats;

pub use expiry::ExpiryReaper;
pub use heartbeat::{HeartbeatMonitor, HeartbeatReport};
pub use metrics::{HostMetrics, HostMetricsSource, SysinfoMetrics};
pub use stats::{StatsReporter, StatsSnapshot};
