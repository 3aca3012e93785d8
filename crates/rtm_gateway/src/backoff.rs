//! Capped exponential backoff for reconnecting to external services.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Delay schedule: `initial * factor^n`, capped at `max`, with ±25% jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// Startup schedule for the bus and discovery: 250ms doubling up to 30s.
    pub const fn for_startup() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30), 2.0)
    }

    /// Returns the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.min(self.max);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = base.mul_f64(jitter).min(self.max);

        self.current = base.mul_f64(self.factor.max(1.0)).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Retries `attempt` until it succeeds, sleeping per `backoff` between tries.
///
/// # Arguments
///
/// * `what` - Name of the dependency, used in log lines
/// * `backoff` - Delay schedule between failed attempts
/// * `attempt` - Produces one connection attempt per call
pub async fn retry_until_ready<T, E, F, Fut>(what: &str, mut backoff: ExponentialBackoff, mut attempt: F) -> T
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = 0u32;
    loop {
        match attempt().await {
            Ok(value) => {
                if failures > 0 {
                    info!("{} ready after {} failed attempt(s)", what, failures);
                }
                return value;
            }
            Err(e) => {
                failures += 1;
                let delay = backoff.next_delay();
                warn!("{} unavailable ({}), retrying in {:?}", what, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
