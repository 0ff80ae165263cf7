//! The broker seam.
//!
//! The gateway talks to its log-based message bus exclusively through the
//! traits in this crate: a process-wide thread-safe producer, a
//! per-route consumer with an explicit manual-commit capability, and a
//! topic admin used at startup. [`MemoryBroker`] is the in-tree
//! implementation — append-only per-partition logs with consumer-group
//! offsets — backing the test suite and the self-contained binary; a real
//! Kafka-backed client plugs in behind the same traits.

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;
pub mod uri;

pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use record::{ConsumerRecord, Headers, ProducerRecord, RecordMetadata};
pub use traits::{BrokerClient, BrokerConsumer, BrokerProducer, ConsumerSettings, TopicAdmin};
pub use uri::BrokerUri;
