//! Record types crossing the broker seam.

use std::borrow::Cow;

/// Record headers: ordered string key/value pairs.
pub type Headers = Vec<(String, String)>;

/// A record handed to the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord {
    pub topic: String,
    /// Partitioning key; hashed by the broker when no explicit partition
    /// is given.
    pub key: Option<String>,
    /// Explicit partition number, when the partition strategy resolves one.
    pub partition: Option<i32>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            partition: None,
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A record delivered by a consumer poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl ConsumerRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Payload as text; envelopes are UTF-8 on the wire.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Where a produced record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: u64,
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_all_fields() {
        let record = ProducerRecord::new("fix.out", b"{}".to_vec())
            .with_key("AAPL")
            .with_partition(2)
            .with_header("routeId", "R1");
        assert_eq!(record.key.as_deref(), Some("AAPL"));
        assert_eq!(record.partition, Some(2));
        assert_eq!(record.header("routeId"), Some("R1"));
        assert_eq!(record.header("missing"), None);
    }

    #[test]
    fn consumer_record_payload_text() {
        let record = ConsumerRecord {
            topic: "t".into(),
            partition: 0,
            offset: 7,
            key: None,
            payload: b"{\"msgType\":\"D\"}".to_vec(),
            headers: vec![("sessionId".into(), "FIX.4.4:A->B".into())],
        };
        assert_eq!(record.payload_str(), "{\"msgType\":\"D\"}");
        assert_eq!(record.header("sessionId"), Some("FIX.4.4:A->B"));
    }
}
