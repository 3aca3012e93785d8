//! Token expiry enforcement.

use crate::connection::ConnectionRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Purges and closes sessions whose token expiry has passed.
#[derive(Debug, Clone)]
pub struct ExpiryReaper {
    registry: Arc<ConnectionRegistry>,
}

impl ExpiryReaper {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Closes every session expiring at or before `now`.
    ///
    /// # Returns
    ///
    /// The number of sessions closed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired = self.registry.sweep_expired(now).await;
        let mut closed = 0;
        for connection in expired {
            info!(
                "Token for {}({}) expired at {}, closing connection {}",
                connection.claims.user_name,
                connection.claims.user_id,
                connection.claims.expiry.at(),
                connection.socket.id()
            );
            if self.registry.purge(&connection.socket, true).await.is_some() {
                closed += 1;
            }
        }
        closed
    }
}
