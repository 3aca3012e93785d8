//! Registration of this instance's ephemeral discovery node.

use super::{CreateMode, DiscoveryClient, NodeDescriptor, SessionEvent};
use crate::backoff::{retry_until_ready, ExponentialBackoff};
use crate::error::DiscoveryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Announces this gateway under the discovery parent path and keeps the
/// announcement alive across session loss.
pub struct NodeAnnouncer {
    client: Arc<dyn DiscoveryClient>,
    parent: String,
    node: NodeDescriptor,
    connect_timeout: Duration,
}

impl NodeAnnouncer {
    pub fn new(
        client: Arc<dyn DiscoveryClient>,
        parent: impl Into<String>,
        node: NodeDescriptor,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            client,
            parent: parent.into(),
            node,
            connect_timeout,
        }
    }

    pub fn node_path(&self) -> String {
        self.node.path_under(&self.parent)
    }

    /// Opens a session, waits for it to connect, and writes the node.
    pub async fn establish(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, DiscoveryError> {
        let mut events = timeout(self.connect_timeout, self.client.connect())
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

        match timeout(self.connect_timeout, events.recv()).await {
            Ok(Some(SessionEvent::Connected)) => {}
            Ok(Some(other)) => {
                return Err(DiscoveryError::Unavailable(format!("session reported {other:?}")));
            }
            Ok(None) => return Err(DiscoveryError::Unavailable("session closed".to_string())),
            Err(_) => return Err(DiscoveryError::Timeout),
        }
        info!("Connected to discovery service");

        self.announce().await?;
        Ok(events)
    }

    /// Ensures the parent exists and replaces any stale node with a fresh
    /// ephemeral one owned by the current session.
    pub async fn announce(&self) -> Result<(), DiscoveryError> {
        self.ensure_parent().await?;

        let path = self.node_path();
        if self.client.exists(&path).await? {
            debug!("Removing stale node {}", path);
            match self.client.remove(&path).await {
                Ok(()) | Err(DiscoveryError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.client.create(&path, CreateMode::Ephemeral).await?;
        info!("📍 Registered discovery node {}", path);
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), DiscoveryError> {
        if self.client.exists(&self.parent).await? {
            return Ok(());
        }
        match self.client.create(&self.parent, CreateMode::Persistent).await {
            Ok(()) => {
                info!("Created discovery parent {}", self.parent);
                Ok(())
            }
            Err(DiscoveryError::NodeExists(_)) => Ok(()),
            Err(e) => {
                error!("CRITICAL: cannot create discovery parent {}: {}", self.parent, e);
                Err(e)
            }
        }
    }

    /// Best-effort removal of the node on shutdown.
    pub async fn withdraw(&self) {
        let path = self.node_path();
        if let Err(e) = self.client.remove(&path).await {
            debug!("Could not remove {} on shutdown: {}", path, e);
        }
    }

    /// Watches the session and re-registers whenever it is lost.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.recv() => break,
            };
            match event {
                Some(SessionEvent::Connected) => debug!("Discovery session connected"),
                lost => {
                    warn!("Discovery session lost ({:?}), re-registering", lost);
                    let this = self.clone();
                    tokio::select! {
                        fresh = retry_until_ready("discovery", ExponentialBackoff::for_startup(), move || {
                            let this = this.clone();
                            async move { this.establish().await }
                        }) => events = fresh,
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }
        self.withdraw().await;
    }
}

impl std::fmt::Debug for NodeAnnouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAnnouncer")
            .field("parent", &self.parent)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MemoryDiscovery;

    fn announcer(discovery: Arc<MemoryDiscovery>) -> Arc<NodeAnnouncer> {
        let node = NodeDescriptor {
            protocol: "http".to_string(),
            host: "10.0.0.7".to_string(),
            port: 8080,
            consumer_topic: "as_rtm_websockets_10_0_0_7".to_string(),
        };
        Arc::new(NodeAnnouncer::new(discovery, "/rtm_nodes", node, Duration::from_secs(5)))
    }

    const NODE: &str = "/rtm_nodes/http#10.0.0.7#8080#as_rtm_websockets_10_0_0_7";

    #[tokio::test]
    async fn test_establish_creates_parent_and_ephemeral_node() {
        let discovery = Arc::new(MemoryDiscovery::new());

        announcer(discovery.clone()).establish().await.unwrap();

        assert_eq!(
            discovery.nodes().await,
            vec!["/rtm_nodes".to_string(), NODE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_announce_replaces_stale_node() {
        let discovery = Arc::new(MemoryDiscovery::new());
        let announcer = announcer(discovery.clone());
        announcer.establish().await.unwrap();

        announcer.announce().await.unwrap();

        assert_eq!(discovery.nodes().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reregisters_after_session_expiry() {
        let discovery = Arc::new(MemoryDiscovery::new());
        let announcer = announcer(discovery.clone());
        let events = announcer.establish().await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(announcer.clone().run(events, shutdown_rx));

        discovery.fail_connects(2).await;
        discovery.expire_session().await;
        assert_eq!(discovery.nodes().await, vec!["/rtm_nodes".to_string()]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(discovery.sessions_opened().await, 2);
        assert!(discovery.nodes().await.contains(&NODE.to_string()));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(discovery.nodes().await, vec!["/rtm_nodes".to_string()]);
    }
}
