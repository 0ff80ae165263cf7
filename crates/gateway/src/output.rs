//! Per-endpoint output listener loop.
//!
//! Raw FIX buffers arrive from one listener endpoint, get normalised and
//! wrapped into envelopes, run through the route's partition strategy,
//! and are published as JSON to the route's output topic through the
//! shared producer.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use fixgate_broker::{BrokerProducer, ProducerRecord};
use fixgate_core::{fix, FixEnvelope};
use fixgate_expr::ExprCache;
use fixgate_routing::{PartitionStrategy, Route};

/// The listener loop for one OUTPUT route endpoint.
pub struct OutputWorker {
    route: Arc<Route>,
    /// The listener URI, for logging only.
    endpoint: String,
    rx: mpsc::Receiver<String>,
    producer: Arc<dyn BrokerProducer>,
    cache: Arc<ExprCache>,
    shutdown: watch::Receiver<bool>,
}

impl OutputWorker {
    pub fn new(
        route: Arc<Route>,
        endpoint: String,
        rx: mpsc::Receiver<String>,
        producer: Arc<dyn BrokerProducer>,
        cache: Arc<ExprCache>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            route,
            endpoint,
            rx,
            producer,
            cache,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            route_id = %self.route.route_id,
            endpoint = %self.endpoint,
            topic = %self.route.resolved_output_topic(),
            "output worker started"
        );

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                buffer = self.rx.recv() => match buffer {
                    Some(raw) => self.handle(raw).await,
                    None => {
                        debug!(route_id = %self.route.route_id, "listener channel closed");
                        break;
                    }
                }
            }
        }

        info!(route_id = %self.route.route_id, endpoint = %self.endpoint, "output worker stopped");
    }

    async fn handle(&self, raw: String) {
        let raw = fix::process_raw_message(&raw);
        if raw.is_empty() {
            return;
        }
        if !fix::is_valid(&raw) {
            debug!(
                route_id = %self.route.route_id,
                "payload lacks the 8=FIX prefix, wrapping as-is"
            );
        }

        let envelope = FixEnvelope::from_raw(
            &self.route.sender_comp_id,
            &self.route.target_comp_id,
            &raw,
        );
        let (key, partition) = self.partition_for(&envelope);

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(route_id = %self.route.route_id, error = %e, "envelope failed to serialise");
                return;
            }
        };

        let topic = self.route.resolved_output_topic();
        let mut record = ProducerRecord::new(topic.clone(), json.into_bytes())
            .with_header("__TypeId__", "fixMessageEnvelope")
            .with_header("senderCompId", envelope.sender_comp_id.clone())
            .with_header("targetCompId", envelope.target_comp_id.clone())
            .with_header("sessionId", envelope.session_id.clone())
            .with_header("routeId", self.route.route_id.clone())
            .with_header("outputTopic", topic.clone());
        if let Some(key) = &key {
            record = record.with_header("kafka.KEY", key.clone()).with_key(key.clone());
        }
        if let Some(partition) = partition {
            record = record
                .with_header("kafka.PARTITION", partition.to_string())
                .with_partition(partition);
        }

        match self.producer.send(record).await {
            Ok(meta) => debug!(
                route_id = %self.route.route_id,
                topic = %topic,
                partition = meta.partition,
                offset = meta.offset,
                "envelope published"
            ),
            Err(e) => error!(route_id = %self.route.route_id, topic = %topic, error = %e, "publish failed"),
        }
    }

    /// Apply the route's partition strategy. Evaluation failures publish
    /// without a key or partition, at error level.
    fn partition_for(&self, envelope: &FixEnvelope) -> (Option<String>, Option<i32>) {
        let Some(expression) = self.route.partition_expression() else {
            return (None, None);
        };
        match self.route.partition_strategy {
            PartitionStrategy::None => (None, None),
            PartitionStrategy::Key => {
                match self
                    .cache
                    .evaluate_partition_expression(expression, envelope, &envelope.parsed_tags)
                {
                    Ok(Some(value)) => (Some(value.display_string()), None),
                    Ok(None) => (None, None),
                    Err(e) => {
                        error!(
                            route_id = %self.route.route_id,
                            expression,
                            error = %e,
                            "partition expression failed, publishing without key"
                        );
                        (None, None)
                    }
                }
            }
            PartitionStrategy::Expr => {
                match self
                    .cache
                    .evaluate(expression, envelope, &envelope.parsed_tags)
                {
                    Ok(value) => match value.as_partition() {
                        Some(partition) => (None, Some(partition)),
                        None => {
                            warn!(
                                route_id = %self.route.route_id,
                                expression,
                                value = %value.display_string(),
                                "partition expression result is not an integer, using broker default"
                            );
                            (None, None)
                        }
                    },
                    Err(e) => {
                        error!(
                            route_id = %self.route.route_id,
                            expression,
                            error = %e,
                            "partition expression failed, publishing without partition"
                        );
                        (None, None)
                    }
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fixgate_broker::{BrokerClient, ConsumerRecord, MemoryBroker};
    use fixgate_expr::ExprCache;
    use fixgate_routing::RouteTable;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    struct Harness {
        broker: MemoryBroker,
        tx: mpsc::Sender<String>,
        shutdown: watch::Sender<bool>,
        worker: tokio::task::JoinHandle<()>,
    }

    fn start(route_json: &str) -> Harness {
        let cache = Arc::new(ExprCache::new());
        let table = RouteTable::from_json(route_json, &cache).unwrap();
        let route = table.routes()[0].clone();

        let broker = MemoryBroker::new();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = OutputWorker::new(
            route,
            "test-endpoint".to_string(),
            rx,
            broker.producer(),
            cache,
            shutdown_rx,
        );
        Harness {
            broker,
            tx,
            shutdown,
            worker: tokio::spawn(worker.run()),
        }
    }

    async fn published(h: &Harness, topic: &str) -> ConsumerRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let records = h.broker.topic_records(topic).await;
            if let Some(record) = records.into_iter().next() {
                return record;
            }
            assert!(tokio::time::Instant::now() < deadline, "record expected on {topic}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn finish(h: Harness) {
        h.shutdown.send(true).unwrap();
        let _ = h.worker.await;
    }

    #[tokio::test]
    async fn wraps_and_publishes_with_headers() {
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );

        h.tx.send(ORDER.to_string()).await.unwrap();
        let record = published(&h, "fix.out").await;

        assert_eq!(record.header("__TypeId__"), Some("fixMessageEnvelope"));
        assert_eq!(record.header("senderCompId"), Some("GTWY"));
        assert_eq!(record.header("targetCompId"), Some("EXEC"));
        assert_eq!(record.header("sessionId"), Some("FIX.4.4:GTWY->EXEC"));
        assert_eq!(record.header("routeId"), Some("out"));
        assert_eq!(record.header("outputTopic"), Some("fix.out"));
        assert_eq!(record.header("kafka.KEY"), None);
        assert_eq!(record.header("kafka.PARTITION"), None);

        let envelope = FixEnvelope::decode(&record.payload_str()).unwrap();
        assert_eq!(envelope.session_id, "FIX.4.4:GTWY->EXEC");
        assert_eq!(envelope.msg_type, "D");
        assert_eq!(envelope.raw_message, ORDER);

        finish(h).await;
    }

    #[tokio::test]
    async fn key_strategy_sets_record_key() {
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out", "partitionStrategy": "KEY", "partitionExpression": "Symbol",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );

        h.tx.send(ORDER.to_string()).await.unwrap();
        let record = published(&h, "fix.out").await;

        assert_eq!(record.key.as_deref(), Some("AAPL"));
        assert_eq!(record.header("kafka.KEY"), Some("AAPL"));
        assert_eq!(record.partition, 0);

        finish(h).await;
    }

    #[tokio::test]
    async fn expr_strategy_sets_partition_number() {
        // New orders land on partition 1, everything else on 0.
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out", "partitionStrategy": "EXPR",
                "partitionExpression": "if (MsgType == 'D') { return 1; } else { return 0; }",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );
        h.broker.admin().ensure_topic("fix.out", 2, 1).await.unwrap();

        h.tx.send(ORDER.to_string()).await.unwrap();
        let record = published(&h, "fix.out").await;

        assert_eq!(record.partition, 1);
        assert_eq!(record.header("kafka.PARTITION"), Some("1"));
        assert_eq!(record.key, None);

        finish(h).await;
    }

    #[tokio::test]
    async fn non_integer_expr_falls_back_to_default() {
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out", "partitionStrategy": "EXPR", "partitionExpression": "Symbol",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );

        h.tx.send(ORDER.to_string()).await.unwrap();
        let record = published(&h, "fix.out").await;

        assert_eq!(record.header("kafka.PARTITION"), None);
        assert_eq!(record.partition, 0);

        finish(h).await;
    }

    #[tokio::test]
    async fn evaluation_error_publishes_without_key() {
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out", "partitionStrategy": "KEY",
                "partitionExpression": "NotBoundAnywhere",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );

        h.tx.send(ORDER.to_string()).await.unwrap();
        let record = published(&h, "fix.out").await;
        assert_eq!(record.key, None);
        assert_eq!(record.header("kafka.KEY"), None);

        finish(h).await;
    }

    #[tokio::test]
    async fn literal_escapes_are_normalised_before_wrapping() {
        let h = start(
            r#"{ "routes": [
              { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
                "outputTopic": "fix.out",
                "destinationConfigs": [ { "uri": "netty:tcp://0.0.0.0:0" } ] } ] }"#,
        );

        h.tx.send("8=FIX.4.4\\u000135=D\\u000155=MSFT".to_string())
            .await
            .unwrap();
        let record = published(&h, "fix.out").await;

        let envelope = FixEnvelope::decode(&record.payload_str()).unwrap();
        assert_eq!(envelope.raw_message, "8=FIX.4.4\u{1}35=D\u{1}55=MSFT\u{1}");
        assert_eq!(envelope.msg_type, "D");

        finish(h).await;
    }
}
