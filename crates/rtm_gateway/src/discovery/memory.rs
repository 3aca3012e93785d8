//! In-process discovery backend for tests and single-node runs.

use super::{CreateMode, DiscoveryClient, SessionEvent};
use crate::error::DiscoveryError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct Namespace {
    nodes: BTreeMap<String, CreateMode>,
    session: Option<mpsc::UnboundedSender<SessionEvent>>,
    failing_connects: usize,
    sessions_opened: usize,
}

/// Discovery backend holding its namespace in memory.
///
/// Ephemeral nodes disappear when the session is expired with
/// [`expire_session`](Self::expire_session), mirroring a real ensemble.
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    inner: Mutex<Namespace>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `attempts` connects fail.
    pub async fn fail_connects(&self, attempts: usize) {
        self.inner.lock().await.failing_connects = attempts;
    }

    /// Ends the current session, dropping its ephemeral nodes.
    pub async fn expire_session(&self) {
        let mut ns = self.inner.lock().await;
        ns.nodes.retain(|_, mode| *mode == CreateMode::Persistent);
        if let Some(session) = ns.session.take() {
            let _ = session.send(SessionEvent::Expired);
        }
    }

    /// Reports a connection loss; nodes survive until the session expires.
    pub async fn disconnect(&self) {
        let mut ns = self.inner.lock().await;
        if let Some(session) = ns.session.take() {
            let _ = session.send(SessionEvent::Disconnected);
        }
    }

    pub async fn nodes(&self) -> Vec<String> {
        self.inner.lock().await.nodes.keys().cloned().collect()
    }

    pub async fn sessions_opened(&self) -> usize {
        self.inner.lock().await.sessions_opened
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

#[async_trait]
impl DiscoveryClient for MemoryDiscovery {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, DiscoveryError> {
        let mut ns = self.inner.lock().await;
        if ns.failing_connects > 0 {
            ns.failing_connects -= 1;
            return Err(DiscoveryError::Unavailable("memory ensemble refused connection".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SessionEvent::Connected);
        ns.session = Some(tx);
        ns.sessions_opened += 1;
        Ok(rx)
    }

    async fn exists(&self, path: &str) -> Result<bool, DiscoveryError> {
        let ns = self.inner.lock().await;
        if ns.session.is_none() {
            return Err(DiscoveryError::Unavailable("no session".to_string()));
        }
        Ok(ns.nodes.contains_key(path))
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<(), DiscoveryError> {
        let mut ns = self.inner.lock().await;
        if ns.session.is_none() {
            return Err(DiscoveryError::Unavailable("no session".to_string()));
        }
        if ns.nodes.contains_key(path) {
            return Err(DiscoveryError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_of(path) {
            if !ns.nodes.contains_key(parent) {
                return Err(DiscoveryError::NoNode(parent.to_string()));
            }
        }
        debug!("Creating {:?} node {}", mode, path);
        ns.nodes.insert(path.to_string(), mode);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), DiscoveryError> {
        let mut ns = self.inner.lock().await;
        if ns.session.is_none() {
            return Err(DiscoveryError::Unavailable("no session".to_string()));
        }
        match ns.nodes.remove(path) {
            Some(_) => Ok(()),
            None => Err(DiscoveryError::NoNode(path.to_string())),
        }
    }
}
