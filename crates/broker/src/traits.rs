//! Seam traits for the broker client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::record::{ConsumerRecord, ProducerRecord, RecordMetadata};

/// Publishes records to broker topics.
///
/// One process-wide instance; sends are thread-safe.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError>;

    /// Wait for buffered sends to land; called during shutdown.
    async fn flush(&self) -> Result<(), BrokerError>;
}

/// Blanket implementation so `Arc<dyn BrokerProducer>` can be used directly.
#[async_trait]
impl<T: BrokerProducer + ?Sized> BrokerProducer for Arc<T> {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError> {
        (**self).send(record).await
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        (**self).flush().await
    }
}

/// Settings for one consumer instance.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub max_poll_records: usize,
    pub auto_commit: bool,
    pub session_timeout: Duration,
}

impl ConsumerSettings {
    /// The gateway's input-loop settings: one record per poll, no
    /// auto-commit, 30 s session timeout.
    pub fn manual(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            max_poll_records: 1,
            auto_commit: false,
            session_timeout: Duration::from_secs(30),
        }
    }
}

/// Consumes one topic within a consumer group.
///
/// Never shared across workers; `&mut self` makes that a compile-time
/// property. `commit` is an explicit capability of the contract — offset
/// commits are not discovered reflectively on some opaque handle.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Poll for the next batch, waiting up to `timeout`. Returns an empty
    /// vec on timeout so callers can observe shutdown between polls.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumerRecord>, BrokerError>;

    /// Commit this record's offset for the consumer group.
    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError>;
}

/// Administrative operations used at startup.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Liveness probe against the bus.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Create the topic when missing.
    async fn ensure_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication: u16,
    ) -> Result<(), BrokerError>;
}

/// Factory for the three broker capabilities.
pub trait BrokerClient: Send + Sync {
    fn producer(&self) -> Arc<dyn BrokerProducer>;
    fn consumer(&self, topic: &str, settings: ConsumerSettings) -> Box<dyn BrokerConsumer>;
    fn admin(&self) -> Arc<dyn TopicAdmin>;
}
