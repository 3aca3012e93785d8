//! Central registry of sockets and authenticated sessions.
//!
//! All indexes live in one [`RegistryState`] behind a single lock so that an
//! insert or purge updates them atomically with respect to every other
//! operation. Bus notifications are published only after the lock has been
//! released.

use super::client::Connection;
use super::socket::{Outbound, SocketHandle};
use super::ConnectionId;
use crate::auth::{Claims, IdentityKey};
use crate::bus::BusPublisher;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// A tracked socket and its liveness flag.
#[derive(Debug)]
struct LiveSocket {
    handle: SocketHandle,
    alive: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Every open socket, authenticated or not.
    sockets: HashMap<ConnectionId, LiveSocket>,
    by_identity: HashMap<IdentityKey, Connection>,
    by_socket: HashMap<ConnectionId, IdentityKey>,
    /// Ordered by expiry; the socket id disambiguates equal instants.
    expiries: BTreeSet<(DateTime<Utc>, ConnectionId)>,
    ios: HashSet<IdentityKey>,
    android: HashSet<IdentityKey>,
}

impl RegistryState {
    fn insert(&mut self, connection: Connection) {
        let socket_id = connection.socket.id();
        let identity = connection.identity.clone();
        self.expiries.insert((connection.claims.expiry.at(), socket_id));
        if connection.platforms.ios {
            self.ios.insert(identity.clone());
        }
        if connection.platforms.android {
            self.android.insert(identity.clone());
        }
        self.by_socket.insert(socket_id, identity.clone());
        self.by_identity.insert(identity, connection);
    }

    /// Removes the session bound to `socket_id` from every index.
    fn remove_by_socket(&mut self, socket_id: ConnectionId) -> Option<Connection> {
        let identity = self.by_socket.remove(&socket_id)?;
        let connection = self.by_identity.remove(&identity)?;
        self.expiries
            .remove(&(connection.claims.expiry.at(), socket_id));
        self.ios.remove(&identity);
        self.android.remove(&identity);
        Some(connection)
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let n = self.by_identity.len();
        n == self.by_socket.len()
            && n == self.expiries.len()
            && self.by_socket.iter().all(|(socket_id, identity)| {
                self.by_identity.get(identity).map(|c| c.socket.id()) == Some(*socket_id)
            })
            && self.by_identity.values().all(|c| {
                self.sockets.contains_key(&c.socket.id())
                    && self.expiries.contains(&(c.claims.expiry.at(), c.socket.id()))
            })
            && self.ios.iter().chain(self.android.iter()).all(|k| self.by_identity.contains_key(k))
    }
}

/// Result of one heartbeat sweep over every tracked socket.
#[derive(Debug, Default)]
pub struct HeartbeatSweep {
    /// Sockets that did not answer the previous ping.
    pub unresponsive: Vec<SocketHandle>,
    /// Sockets that were alive and must be pinged again.
    pub pinged: Vec<SocketHandle>,
}

/// Per-interval traffic counters, taken by the stats reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSample {
    pub sent: u64,
    pub received: u64,
    /// Cumulative since startup; never reset.
    pub errors: u64,
}

/// Live session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub sockets: usize,
    pub active: usize,
    pub ios: usize,
    pub android: usize,
}

#[derive(Debug, Default)]
struct TrafficCounters {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
}

/// Tracks every open socket and every authenticated session on this instance.
///
/// # Invariants
///
/// * At most one session per identity key, and at most one identity per socket
/// * The identity, socket and expiry indexes always describe the same sessions
/// * Platform sets only contain identities that have a session
/// * A socket is in the heartbeat set from open until close
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    publisher: Arc<BusPublisher>,
    counters: TrafficCounters,
    next_id: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new(publisher: Arc<BusPublisher>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            publisher,
            counters: TrafficCounters::default(),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Starts tracking a freshly accepted socket.
    ///
    /// # Arguments
    ///
    /// * `remote_addr` - The network address of the connecting client
    ///
    /// # Returns
    ///
    /// The socket's handle and the queue its writer task must drain.
    pub async fn track(&self, remote_addr: SocketAddr) -> (SocketHandle, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, rx) = SocketHandle::new(id, remote_addr);
        self.state.write().await.sockets.insert(
            id,
            LiveSocket {
                handle: handle.clone(),
                alive: true,
            },
        );
        debug!("🔗 Connection {} from {}", id, remote_addr);
        (handle, rx)
    }

    /// Binds `socket` to the identity in `claims`.
    ///
    /// Any session previously held by this socket is dropped first. If the
    /// identity is already held by another socket, that socket is purged and
    /// terminated so the newest connection wins. Purge notifications for
    /// displaced sessions are published before `ws_cache_connection`.
    ///
    /// # Returns
    ///
    /// The registered identity, or `None` if the socket closed in the meantime.
    pub async fn register(&self, socket: &SocketHandle, claims: Claims) -> Option<IdentityKey> {
        let connection = Connection::new(socket.clone(), claims);
        let identity = connection.identity.clone();
        let mut displaced = Vec::new();
        let mut superseded = None;

        {
            let mut state = self.state.write().await;
            if !state.sockets.contains_key(&socket.id()) {
                return None;
            }
            if let Some(previous) = state.remove_by_socket(socket.id()) {
                displaced.push(previous.identity);
            }
            let holder = state.by_identity.get(&identity).map(|c| c.socket.id());
            if let Some(holder) = holder {
                if let Some(previous) = state.remove_by_socket(holder) {
                    state.sockets.remove(&holder);
                    displaced.push(previous.identity);
                    superseded = Some(previous.socket);
                }
            }
            state.insert(connection.clone());
        }

        if let Some(old) = superseded {
            info!("Replacing connection {} held by {}", old.id(), identity);
            old.terminate();
        }
        for key in &displaced {
            self.publish_purge(key).await;
        }

        let claims = &connection.claims;
        info!(
            "User {}({}) from [{}] using [{}] expiring [{}]",
            claims.user_name,
            claims.user_id,
            claims.client_ip,
            claims.user_agent,
            claims.expiry.at()
        );
        let cache = json!({
            "command": "ws_cache_connection",
            "user_id": claims.user_id,
            "user_name": claims.user_name,
            "client_ip": claims.client_ip,
            "user_agent": claims.user_agent,
            "expiry": claims.expiry,
            "finger_print": claims.finger_print,
            "topic": claims.topic,
        });
        self.publisher.publish_for(&identity, into_map(cache)).await;

        Some(identity)
    }

    pub async fn lookup_socket(&self, identity: &IdentityKey) -> Option<SocketHandle> {
        let state = self.state.read().await;
        state.by_identity.get(identity).map(|c| c.socket.clone())
    }

    pub async fn lookup_identity(&self, socket: &SocketHandle) -> Option<IdentityKey> {
        let state = self.state.read().await;
        state.by_socket.get(&socket.id()).cloned()
    }

    /// Drops the session bound to `socket`, if any, and announces it.
    ///
    /// With `terminate` the socket is also closed and untracked; without it the
    /// socket stays open and unauthenticated.
    pub async fn purge(&self, socket: &SocketHandle, terminate: bool) -> Option<IdentityKey> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.remove_by_socket(socket.id());
            if terminate {
                state.sockets.remove(&socket.id());
            }
            removed
        };

        if terminate {
            socket.terminate();
        }

        let connection = removed?;
        info!(
            "Disconnecting user {}({}) from [{}] using [{}]",
            connection.claims.user_name,
            connection.claims.user_id,
            connection.claims.client_ip,
            connection.claims.user_agent
        );
        self.publish_purge(&connection.identity).await;
        Some(connection.identity)
    }

    /// Transport close or error: untrack the socket and drop its session.
    pub async fn release(&self, socket: &SocketHandle) -> Option<IdentityKey> {
        debug!("❌ Connection {} from {} closed", socket.id(), socket.remote_addr());
        self.purge(socket, true).await
    }

    /// Records a liveness reply for `socket`.
    pub async fn mark_alive(&self, socket: &SocketHandle) {
        let mut state = self.state.write().await;
        if let Some(live) = state.sockets.get_mut(&socket.id()) {
            live.alive = true;
        }
    }

    /// Splits tracked sockets into those that missed the last ping and those
    /// to ping now. Pinged sockets are marked not-alive until they answer.
    pub async fn sweep_unresponsive(&self) -> HeartbeatSweep {
        let mut state = self.state.write().await;
        let mut sweep = HeartbeatSweep::default();
        for live in state.sockets.values_mut() {
            if live.alive {
                live.alive = false;
                sweep.pinged.push(live.handle.clone());
            } else {
                sweep.unresponsive.push(live.handle.clone());
            }
        }
        sweep
    }

    /// Sessions whose token expiry is at or before `now`, in expiry order.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Connection> {
        let state = self.state.read().await;
        state
            .expiries
            .range(..=(now, ConnectionId::MAX))
            .filter_map(|(_, socket_id)| {
                let identity = state.by_socket.get(socket_id)?;
                state.by_identity.get(identity).cloned()
            })
            .collect()
    }

    /// Sends `text` to the socket currently holding `identity`.
    ///
    /// Returns `false` when no live session holds that identity.
    pub async fn send_to_identity(&self, identity: &IdentityKey, text: String) -> bool {
        let Some(socket) = self.lookup_socket(identity).await else {
            return false;
        };
        let sent = socket.send_text(text);
        if sent {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    pub fn record_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns sent/received since the previous call and resets them.
    pub fn take_traffic(&self) -> TrafficSample {
        TrafficSample {
            sent: self.counters.sent.swap(0, Ordering::Relaxed),
            received: self.counters.received.swap(0, Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn counts(&self) -> RegistryCounts {
        let state = self.state.read().await;
        RegistryCounts {
            sockets: state.sockets.len(),
            active: state.by_identity.len(),
            ios: state.ios.len(),
            android: state.android.len(),
        }
    }

    /// Closes every tracked socket. Used on shutdown.
    pub async fn terminate_all(&self) {
        let state = self.state.read().await;
        for live in state.sockets.values() {
            live.handle.terminate();
        }
    }

    async fn publish_purge(&self, identity: &IdentityKey) {
        self.publisher
            .publish_for(identity, into_map(json!({ "command": "ws_purge_connection" })))
            .await;
    }

    #[cfg(test)]
    pub(crate) async fn is_consistent(&self) -> bool {
        self.state.read().await.is_consistent()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
