//! Service discovery: announcing this instance to the cluster.
//!
//! The coordination service is an external collaborator exposing a small
//! hierarchical namespace with ephemeral nodes, the way ZooKeeper does. The
//! gateway needs only session events and `exists`/`create`/`remove`.

pub mod announcer;
pub mod memory;
pub mod zookeeper;

use crate::error::DiscoveryError;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use announcer::NodeAnnouncer;
pub use memory::MemoryDiscovery;
pub use zookeeper::ZkDiscovery;

/// Session lifecycle notifications from the discovery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// The session is gone together with its ephemeral nodes.
    Expired,
}

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed by the backend when the creating session ends.
    Ephemeral,
}

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Opens a new session and returns its event stream.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, DiscoveryError>;

    async fn exists(&self, path: &str) -> Result<bool, DiscoveryError>;

    async fn create(&self, path: &str, mode: CreateMode) -> Result<(), DiscoveryError>;

    async fn remove(&self, path: &str) -> Result<(), DiscoveryError>;
}

/// Describes how clients reach this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub consumer_topic: String,
}

impl NodeDescriptor {
    /// Node name: `{protocol}#{host}#{port}#{consumer_topic}`.
    pub fn node_name(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.protocol, self.host, self.port, self.consumer_topic
        )
    }

    pub fn path_under(&self, parent: &str) -> String {
        format!("{}/{}", parent.trim_end_matches('/'), self.node_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path_format() {
        let node = NodeDescriptor {
            protocol: "https".to_string(),
            host: "rtm1.example.com".to_string(),
            port: 443,
            consumer_topic: "as_rtm_websockets_rtm1_example_com".to_string(),
        };
        assert_eq!(
            node.path_under("/rtm_nodes/"),
            "/rtm_nodes/https#rtm1.example.com#443#as_rtm_websockets_rtm1_example_com"
        );
    }
}
