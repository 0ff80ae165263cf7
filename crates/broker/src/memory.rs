//! In-memory log-structured broker.
//!
//! Each topic is a set of append-only partition logs with sequential
//! offsets; consumer groups track a committed offset per partition. A
//! consumer's read position advances as it polls, but a fresh consumer of
//! the same group resumes from the committed offset — uncommitted records
//! are therefore re-delivered, which is exactly the at-least-once
//! behaviour the gateway's manual-commit loop is written against.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::error::BrokerError;
use crate::record::{ConsumerRecord, Headers, ProducerRecord, RecordMetadata};
use crate::traits::{BrokerClient, BrokerConsumer, BrokerProducer, ConsumerSettings, TopicAdmin};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    payload: Vec<u8>,
    headers: Headers,
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Vec<StoredRecord>>,
}

impl Topic {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    /// group id → (topic, partition) → next offset to deliver.
    committed: HashMap<String, HashMap<(String, i32), u64>>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    appended: Notify,
    round_robin: AtomicUsize,
}

/// The in-memory broker. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                round_robin: AtomicUsize::new(0),
            }),
        }
    }

    /// All records currently held by a topic, across partitions in
    /// partition-then-offset order. Test and introspection helper.
    pub async fn topic_records(&self, topic: &str) -> Vec<ConsumerRecord> {
        let state = self.inner.state.lock().await;
        let Some(found) = state.topics.get(topic) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (partition, log) in found.partitions.iter().enumerate() {
            for (offset, record) in log.iter().enumerate() {
                out.push(ConsumerRecord {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as u64,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    headers: record.headers.clone(),
                });
            }
        }
        out
    }

    pub async fn topic_len(&self, topic: &str) -> usize {
        self.topic_records(topic).await.len()
    }

    pub async fn topic_names(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut names: Vec<String> = state.topics.keys().cloned().collect();
        names.sort();
        names
    }
}

impl BrokerClient for MemoryBroker {
    fn producer(&self) -> Arc<dyn BrokerProducer> {
        Arc::new(MemoryProducer {
            inner: self.inner.clone(),
        })
    }

    fn consumer(&self, topic: &str, settings: ConsumerSettings) -> Box<dyn BrokerConsumer> {
        Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            settings,
            positions: HashMap::new(),
        })
    }

    fn admin(&self) -> Arc<dyn TopicAdmin> {
        Arc::new(MemoryAdmin {
            inner: self.inner.clone(),
        })
    }
}

// ── Producer ────────────────────────────────────────────────────────

struct MemoryProducer {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError> {
        let mut state = self.inner.state.lock().await;
        let topic = state
            .topics
            .entry(record.topic.clone())
            .or_insert_with(|| Topic::new(1));

        let count = topic.partitions.len();
        let partition = match (record.partition, &record.key) {
            (Some(explicit), _) => explicit.rem_euclid(count as i32) as usize,
            (None, Some(key)) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            (None, None) => self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % count,
        };

        let log = &mut topic.partitions[partition];
        let offset = log.len() as u64;
        log.push(StoredRecord {
            key: record.key,
            payload: record.payload,
            headers: record.headers,
        });
        drop(state);

        self.inner.appended.notify_waiters();
        debug!(topic = %record.topic, partition, offset, "record appended");
        Ok(RecordMetadata {
            partition: partition as i32,
            offset,
        })
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        // Appends are synchronous; nothing is buffered.
        Ok(())
    }
}

// ── Consumer ────────────────────────────────────────────────────────

struct MemoryConsumer {
    inner: Arc<Inner>,
    topic: String,
    settings: ConsumerSettings,
    /// Read position per partition; seeded from the committed offset the
    /// first time a partition is touched.
    positions: HashMap<i32, u64>,
}

impl MemoryConsumer {
    fn take_batch(
        topic_name: &str,
        settings: &ConsumerSettings,
        positions: &mut HashMap<i32, u64>,
        state: &mut State,
    ) -> Vec<ConsumerRecord> {
        let Some(topic) = state.topics.get(topic_name) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        for (partition, log) in topic.partitions.iter().enumerate() {
            let partition = partition as i32;
            let committed = state
                .committed
                .get(&settings.group_id)
                .and_then(|offsets| offsets.get(&(topic_name.to_string(), partition)))
                .copied()
                .unwrap_or(0);
            let start = *positions.entry(partition).or_insert(committed);

            let mut position = start;
            while (position as usize) < log.len() && batch.len() < settings.max_poll_records {
                let record = &log[position as usize];
                batch.push(ConsumerRecord {
                    topic: topic_name.to_string(),
                    partition,
                    offset: position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    headers: record.headers.clone(),
                });
                position += 1;
            }
            positions.insert(partition, position);

            if batch.len() >= settings.max_poll_records {
                break;
            }
        }
        batch
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumerRecord>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.appended.notified();
            {
                let mut state = self.inner.state.lock().await;
                let batch = Self::take_batch(
                    &self.topic,
                    &self.settings,
                    &mut self.positions,
                    &mut state,
                );
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError> {
        if self.settings.auto_commit {
            return Err(BrokerError::Commit(
                "manual commit on an auto-commit consumer".to_string(),
            ));
        }
        let mut state = self.inner.state.lock().await;
        state
            .committed
            .entry(self.settings.group_id.clone())
            .or_default()
            .insert((record.topic.clone(), record.partition), record.offset + 1);
        debug!(
            group = %self.settings.group_id,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "offset committed"
        );
        Ok(())
    }
}

// ── Admin ───────────────────────────────────────────────────────────

struct MemoryAdmin {
    inner: Arc<Inner>,
}

#[async_trait]
impl TopicAdmin for MemoryAdmin {
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn ensure_topic(
        &self,
        topic: &str,
        partitions: u32,
        _replication: u16,
    ) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(partitions));
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produce_then_consume_in_order() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        for n in 0..3u8 {
            producer
                .send(ProducerRecord::new("t", vec![n]))
                .await
                .unwrap();
        }

        let mut consumer = broker.consumer("t", ConsumerSettings::manual("g"));
        for expected in 0..3u8 {
            let batch = consumer.poll(Duration::from_millis(100)).await.unwrap();
            assert_eq!(batch.len(), 1, "max_poll_records=1 yields single records");
            assert_eq!(batch[0].payload, vec![expected]);
            assert_eq!(batch[0].offset, expected as u64);
            consumer.commit(&batch[0]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn poll_times_out_empty() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("empty", ConsumerSettings::manual("g"));
        let batch = consumer.poll(Duration::from_millis(50)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn poll_wakes_on_append() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        let mut consumer = broker.consumer("t", ConsumerSettings::manual("g"));

        let send = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer
                .send(ProducerRecord::new("t", b"x".to_vec()))
                .await
                .unwrap();
        });

        let batch = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(batch.len(), 1);
        send.await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered_to_the_group() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        producer
            .send(ProducerRecord::new("t", b"a".to_vec()))
            .await
            .unwrap();
        producer
            .send(ProducerRecord::new("t", b"b".to_vec()))
            .await
            .unwrap();

        // First consumer commits only the first record, then "crashes".
        let mut first = broker.consumer("t", ConsumerSettings::manual("g"));
        let batch = first.poll(Duration::from_millis(100)).await.unwrap();
        first.commit(&batch[0]).await.unwrap();
        let _uncommitted = first.poll(Duration::from_millis(100)).await.unwrap();
        drop(first);

        // A replacement consumer resumes after the committed offset.
        let mut second = broker.consumer("t", ConsumerSettings::manual("g"));
        let batch = second.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch[0].payload, b"b".to_vec());
        assert_eq!(batch[0].offset, 1);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        producer
            .send(ProducerRecord::new("t", b"a".to_vec()))
            .await
            .unwrap();

        let mut g1 = broker.consumer("t", ConsumerSettings::manual("g1"));
        let batch = g1.poll(Duration::from_millis(100)).await.unwrap();
        g1.commit(&batch[0]).await.unwrap();

        let mut g2 = broker.consumer("t", ConsumerSettings::manual("g2"));
        let batch = g2.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch[0].payload, b"a".to_vec());
    }

    #[tokio::test]
    async fn key_hashing_is_stable_across_partitions() {
        let broker = MemoryBroker::new();
        broker.admin().ensure_topic("t", 4, 1).await.unwrap();
        let producer = broker.producer();

        let first = producer
            .send(ProducerRecord::new("t", b"1".to_vec()).with_key("AAPL"))
            .await
            .unwrap();
        let second = producer
            .send(ProducerRecord::new("t", b"2".to_vec()).with_key("AAPL"))
            .await
            .unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn explicit_partition_wins_over_key() {
        let broker = MemoryBroker::new();
        broker.admin().ensure_topic("t", 4, 1).await.unwrap();
        let producer = broker.producer();

        let meta = producer
            .send(
                ProducerRecord::new("t", b"1".to_vec())
                    .with_key("AAPL")
                    .with_partition(3),
            )
            .await
            .unwrap();
        assert_eq!(meta.partition, 3);
    }

    #[tokio::test]
    async fn ensure_topic_is_idempotent() {
        let broker = MemoryBroker::new();
        let admin = broker.admin();
        admin.ensure_topic("t", 2, 1).await.unwrap();
        admin.ensure_topic("t", 8, 1).await.unwrap();

        let producer = broker.producer();
        producer
            .send(ProducerRecord::new("t", b"x".to_vec()).with_partition(1))
            .await
            .unwrap();
        assert_eq!(broker.topic_len("t").await, 1);
        assert_eq!(broker.topic_names().await, vec!["t".to_string()]);
    }
}
