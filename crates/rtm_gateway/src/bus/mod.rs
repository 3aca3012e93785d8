//! Message bus integration.
//!
//! The broker itself is an external collaborator. The gateway only needs two
//! narrow async capabilities from it: publishing a string envelope onto a
//! topic, and receiving the deliveries addressed to this instance. Both are
//! expressed as traits so that the registry, router and timers never depend
//! on a concrete transport.

pub mod delivery;
pub mod envelope;
pub mod kafka;
pub mod memory;
pub mod publisher;

use crate::error::BusError;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use delivery::{BusDelivery, DeliveryOutcome, DeliveryRelay};
pub use envelope::ENVELOPE_PREFIX;
pub use kafka::KafkaBus;
pub use memory::MemoryBus;
pub use publisher::BusPublisher;

/// Producer side of the bus.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Establishes the producer connection. Called until it succeeds at startup.
    async fn connect(&self) -> Result<(), BusError>;

    /// Publishes one already-encoded envelope onto `topic`.
    async fn publish(&self, topic: &str, message: String) -> Result<(), BusError>;
}

/// Consumer side of the bus.
#[async_trait]
pub trait BusConsumer: Send + Sync {
    /// Subscribes to `topic`; each received message arrives as a UTF-8 string.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError>;
}
