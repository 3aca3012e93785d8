//! Kafka transport for the bus traits.
//!
//! Publishing spreads records over the topic's partitions in turn. Consuming
//! follows every partition of this instance's topic from the latest offset,
//! so deliveries queued while the gateway was down are not replayed.

use super::{BusConsumer, BusProducer};
use crate::error::BusError;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rskafka::client::consumer::{StartOffset, StreamConsumerBuilder};
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info, warn};

const SUBSCRIPTION_BUFFER: usize = 1024;
const FETCH_MAX_WAIT_MS: i32 = 500;
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Splits a `host:port[,host:port...]` list, ignoring blanks.
pub fn parse_broker_list(brokers: &str) -> Result<Vec<String>, BusError> {
    let parsed: Vec<String> = brokers
        .split(',')
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .map(str::to_string)
        .collect();
    if parsed.is_empty() {
        return Err(BusError::Unavailable("no Kafka brokers configured".to_string()));
    }
    Ok(parsed)
}

/// The partitions of one topic and the cursor that rotates over them.
struct TopicWriter {
    partitions: Vec<Arc<PartitionClient>>,
    next: AtomicUsize,
}

impl TopicWriter {
    fn next_partition(&self) -> Option<&Arc<PartitionClient>> {
        let index = pick_partition(self.next.fetch_add(1, Ordering::Relaxed), self.partitions.len())?;
        self.partitions.get(index)
    }
}

fn pick_partition(turn: usize, partitions: usize) -> Option<usize> {
    (partitions > 0).then(|| turn % partitions)
}

/// Message bus backed by a Kafka cluster.
///
/// One client is shared by the producer and the consumer side. It is built by
/// the first successful [`connect`](BusProducer::connect) or
/// [`subscribe`](BusConsumer::subscribe).
pub struct KafkaBus {
    brokers: Vec<String>,
    client: OnceCell<Arc<Client>>,
    writers: Mutex<HashMap<String, Arc<TopicWriter>>>,
}

impl KafkaBus {
    /// Creates a bus for a comma-separated broker list. Nothing is dialed yet.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Ok(Self {
            brokers: parse_broker_list(brokers)?,
            client: OnceCell::new(),
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    async fn client(&self) -> Result<Arc<Client>, BusError> {
        self.client
            .get_or_try_init(|| async {
                let client = ClientBuilder::new(self.brokers.clone())
                    .build()
                    .await
                    .map_err(|e| BusError::Unavailable(e.to_string()))?;
                info!("Kafka client connected to {}", self.brokers.join(","));
                Ok(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Partition ids of `topic`; a topic the cluster does not know yet is
    /// treated as single-partition and left to broker auto-creation.
    async fn partitions_of(client: &Client, topic: &str) -> Result<Vec<i32>, BusError> {
        let topics = client
            .list_topics()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let partitions: Vec<i32> = topics
            .into_iter()
            .find(|t| t.name == topic)
            .map(|t| t.partitions.into_iter().collect())
            .unwrap_or_default();
        if partitions.is_empty() {
            return Ok(vec![0]);
        }
        Ok(partitions)
    }

    async fn partition_clients(
        client: &Client,
        topic: &str,
    ) -> Result<Vec<Arc<PartitionClient>>, BusError> {
        let mut clients = Vec::new();
        for partition in Self::partitions_of(client, topic).await? {
            let partition_client = client
                .partition_client(topic.to_string(), partition, UnknownTopicHandling::Retry)
                .await
                .map_err(|e| BusError::Unavailable(format!("{topic}/{partition}: {e}")))?;
            clients.push(Arc::new(partition_client));
        }
        Ok(clients)
    }

    async fn writer(&self, topic: &str) -> Result<Arc<TopicWriter>, BusError> {
        let client = self
            .client
            .get()
            .cloned()
            .ok_or_else(|| BusError::Unavailable("producer is not connected".to_string()))?;

        let mut writers = self.writers.lock().await;
        if let Some(writer) = writers.get(topic) {
            return Ok(writer.clone());
        }
        let writer = Arc::new(TopicWriter {
            partitions: Self::partition_clients(&client, topic).await?,
            next: AtomicUsize::new(0),
        });
        writers.insert(topic.to_string(), writer.clone());
        Ok(writer)
    }
}

fn text_record(message: String) -> Record {
    Record {
        key: None,
        value: Some(message.into_bytes()),
        headers: BTreeMap::new(),
        timestamp: Utc::now(),
    }
}

/// The record value as text; records without a UTF-8 value are skipped.
fn record_text(record: Record) -> Option<String> {
    String::from_utf8(record.value?).ok()
}

#[async_trait]
impl BusProducer for KafkaBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.client().await.map(|_| ())
    }

    async fn publish(&self, topic: &str, message: String) -> Result<(), BusError> {
        let writer = self.writer(topic).await?;
        let partition = writer
            .next_partition()
            .ok_or_else(|| BusError::Publish(format!("{topic} has no partitions")))?;
        partition
            .produce(vec![text_record(message)], Compression::NoCompression)
            .await
            .map_err(|e| BusError::Publish(format!("{topic}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for KafkaBus {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError> {
        let client = self.client().await?;
        let partitions = Self::partition_clients(&client, topic).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        for partition in partitions {
            tokio::spawn(follow_partition(topic.to_string(), partition, tx.clone()));
        }
        Ok(rx)
    }
}

/// Forwards one partition's records until the receiver is dropped.
async fn follow_partition(topic: String, partition: Arc<PartitionClient>, tx: mpsc::Sender<String>) {
    let id = partition.partition();
    let mut stream = StreamConsumerBuilder::new(partition, StartOffset::Latest)
        .with_max_wait_ms(FETCH_MAX_WAIT_MS)
        .build();
    debug!("Following {}/{}", topic, id);

    loop {
        let item = tokio::select! {
            _ = tx.closed() => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok((record, _high_watermark))) => {
                let offset = record.offset;
                match record_text(record.record) {
                    Some(text) => {
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    None => warn!("Skipping non-text record {}/{}@{}", topic, id, offset),
                }
            }
            Some(Err(e)) => {
                warn!("Fetch from {}/{} failed: {}", topic, id, e);
                tokio::time::sleep(FETCH_RETRY_DELAY).await;
            }
            None => break,
        }
    }
    debug!("Stopped following {}/{}", topic, id);
}
