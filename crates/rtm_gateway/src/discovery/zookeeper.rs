//! ZooKeeper backend for [`DiscoveryClient`].

use super::{CreateMode, DiscoveryClient, SessionEvent};
use crate::error::DiscoveryError;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use zookeeper_client as zk;

/// Maps a ZooKeeper session state onto the gateway's session events.
///
/// `None` means the state carries no news for the announcer.
pub fn session_event(state: zk::SessionState) -> Option<SessionEvent> {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => {
            Some(SessionEvent::Connected)
        }
        zk::SessionState::Disconnected => Some(SessionEvent::Disconnected),
        zk::SessionState::Expired | zk::SessionState::Closed | zk::SessionState::AuthFailed => {
            Some(SessionEvent::Expired)
        }
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn is_terminal(event: SessionEvent) -> bool {
    event == SessionEvent::Expired
}

fn discovery_error(path: &str, error: zk::Error) -> DiscoveryError {
    match error {
        zk::Error::NodeExists => DiscoveryError::NodeExists(path.to_string()),
        zk::Error::NoNode => DiscoveryError::NoNode(path.to_string()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired | zk::Error::ClientClosed => {
            DiscoveryError::Unavailable(error.to_string())
        }
        other => DiscoveryError::Operation(format!("{path}: {other}")),
    }
}

/// Discovery backed by a ZooKeeper ensemble.
///
/// Each [`connect`](DiscoveryClient::connect) opens a fresh session and
/// replaces the previous one; node operations always use the latest.
pub struct ZkDiscovery {
    cluster: String,
    session: Mutex<Option<zk::Client>>,
}

impl ZkDiscovery {
    /// `cluster` is a connect string such as `zk1:2181,zk2:2181[/chroot]`.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            session: Mutex::new(None),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn current(&self) -> Result<zk::Client, DiscoveryError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| DiscoveryError::Unavailable("no session".to_string()))
    }
}

#[async_trait]
impl DiscoveryClient for ZkDiscovery {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, DiscoveryError> {
        let client = zk::Client::connect(&self.cluster)
            .await
            .map_err(|e| DiscoveryError::Unavailable(format!("{}: {}", self.cluster, e)))?;
        info!("ZooKeeper session established with {}", self.cluster);

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SessionEvent::Connected);

        let mut watcher = client.state_watcher();
        tokio::spawn(async move {
            loop {
                let state = watcher.changed().await;
                debug!("ZooKeeper session state: {:?}", state);
                let Some(event) = session_event(state) else {
                    continue;
                };
                if tx.send(event).is_err() || is_terminal(event) {
                    break;
                }
            }
        });

        *self.session.lock().await = Some(client);
        Ok(rx)
    }

    async fn exists(&self, path: &str) -> Result<bool, DiscoveryError> {
        let client = self.current().await?;
        let stat = client
            .check_stat(path)
            .await
            .map_err(|e| discovery_error(path, e))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<(), DiscoveryError> {
        let client = self.current().await?;
        let zk_mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = zk_mode.with_acls(zk::Acls::anyone_all());
        client
            .create(path, &[], &options)
            .await
            .map_err(|e| discovery_error(path, e))?;
        debug!("Created {:?} node {}", mode, path);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), DiscoveryError> {
        let client = self.current().await?;
        client
            .delete(path, None)
            .await
            .map_err(|e| discovery_error(path, e))
    }
}
