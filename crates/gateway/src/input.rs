//! Per-route input consumer loop.
//!
//! One worker per INPUT route, one broker consumer per worker, one
//! record per poll. The offset is committed manually after dispatch
//! terminates — by success, skip, or dead-letter. Decode and validation
//! failures are logged and still committed so a poison record never
//! blocks its partition; the only uncommitted exits are shutdown and a
//! surfaced `stopOnException`, both of which lead to redelivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use fixgate_broker::{BrokerConsumer, BrokerProducer, ConsumerRecord, ProducerRecord};
use fixgate_core::FixEnvelope;
use fixgate_routing::{Direction, Route, RouteTable};

use crate::dispatch::Dispatcher;
use crate::error::GatewayError;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

enum RecordOutcome {
    /// Terminal: commit the offset and move on.
    Commit,
    /// A surfaced exception; re-run the whole envelope.
    Redeliver,
    /// Shutdown observed; leave the offset uncommitted.
    Interrupted,
}

/// The consumer loop for one INPUT route.
pub struct InputWorker {
    route: Arc<Route>,
    table: Arc<RouteTable>,
    consumer: Box<dyn BrokerConsumer>,
    dispatcher: Arc<Dispatcher>,
    producer: Arc<dyn BrokerProducer>,
    shutdown: watch::Receiver<bool>,
}

impl InputWorker {
    pub fn new(
        route: Arc<Route>,
        table: Arc<RouteTable>,
        consumer: Box<dyn BrokerConsumer>,
        dispatcher: Arc<Dispatcher>,
        producer: Arc<dyn BrokerProducer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            route,
            table,
            consumer,
            dispatcher,
            producer,
            shutdown,
        }
    }

    /// Poll, process, commit — until shutdown.
    pub async fn run(mut self) {
        info!(
            route_id = %self.route.route_id,
            topic = %self.route.resolved_input_topic(),
            group = %self.route.consumer_group_id(),
            "input worker started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let records = match self.consumer.poll(POLL_TIMEOUT).await {
                Ok(records) => records,
                Err(e) => {
                    error!(route_id = %self.route.route_id, error = %e, "poll failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            for record in records {
                debug!(
                    route_id = %self.route.route_id,
                    partition = record.partition,
                    offset = record.offset,
                    "record received"
                );
                if !self.handle_record(&record).await {
                    info!(route_id = %self.route.route_id, "stopping without commit, record will be redelivered");
                    return;
                }
            }
        }

        info!(route_id = %self.route.route_id, "input worker stopped");
    }

    /// Process one record to a commit decision. Returns `false` when the
    /// worker must stop without committing.
    async fn handle_record(&mut self, record: &ConsumerRecord) -> bool {
        let handling = self
            .route
            .error_handling
            .clone()
            .unwrap_or_default();
        let mut redeliveries = 0u32;

        loop {
            match self.process(record).await {
                RecordOutcome::Commit => {
                    self.commit_record(record).await;
                    return true;
                }
                RecordOutcome::Interrupted => return false,
                RecordOutcome::Redeliver => {
                    if redeliveries >= handling.max_redeliveries {
                        error!(
                            route_id = %self.route.route_id,
                            offset = record.offset,
                            redeliveries,
                            "redeliveries exhausted, dead-lettering at route level"
                        );
                        self.route_dead_letter(record, &handling.dead_letter_topic)
                            .await;
                        self.commit_record(record).await;
                        return true;
                    }
                    redeliveries += 1;
                    warn!(
                        route_id = %self.route.route_id,
                        offset = record.offset,
                        redeliveries,
                        delay_ms = handling.redelivery_delay_ms,
                        "redelivering envelope"
                    );
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(handling.redelivery_delay_ms)) => {}
                        _ = shutdown.wait_for(|stopping| *stopping) => return false,
                    }
                }
            }
        }
    }

    async fn commit_record(&mut self, record: &ConsumerRecord) {
        if let Err(e) = self.consumer.commit(record).await {
            error!(
                route_id = %self.route.route_id,
                offset = record.offset,
                error = %e,
                "offset commit failed"
            );
        }
    }

    /// Decode → enrich → validate → resolve destinations → dispatch.
    async fn process(&self, record: &ConsumerRecord) -> RecordOutcome {
        let payload = record.payload_str();
        let mut envelope = match FixEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // ParseError: never block the partition on a poison record.
                error!(
                    route_id = %self.route.route_id,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "envelope decode failed, committing past record"
                );
                return RecordOutcome::Commit;
            }
        };
        envelope.enrich_from_raw();

        if let Err(e) = envelope.ensure_routable() {
            error!(
                route_id = %self.route.route_id,
                offset = record.offset,
                error = %e,
                "envelope failed validation, committing past record"
            );
            return RecordOutcome::Commit;
        }

        let route = self.resolve_route(record, &envelope);
        match self.dispatcher.dispatch(&envelope, &route).await {
            Ok(summary) => {
                trace!(
                    route_id = %route.route_id,
                    delivered = summary.delivered,
                    skipped = summary.skipped,
                    dead_lettered = summary.dead_lettered,
                    "record dispatched"
                );
                RecordOutcome::Commit
            }
            Err(GatewayError::Interrupted) => RecordOutcome::Interrupted,
            Err(GatewayError::StopOnException(uri)) => {
                warn!(
                    route_id = %route.route_id,
                    destination = %uri,
                    "dispatch stopped by destination failure"
                );
                RecordOutcome::Redeliver
            }
            Err(e) => {
                error!(route_id = %route.route_id, error = %e, "dispatch failed, committing past record");
                RecordOutcome::Commit
            }
        }
    }

    /// Destination resolution. The worker's own route is the `routeId`
    /// path; a record carrying a different `routeId` header is honoured
    /// against the table, and a comp-id mismatch falls back to the legacy
    /// sender/target match kept for producers that predate route-id
    /// propagation.
    fn resolve_route(&self, record: &ConsumerRecord, envelope: &FixEnvelope) -> Arc<Route> {
        if let Some(id) = record.header("routeId") {
            if let Some(route) = self.table.by_id(id) {
                return route;
            }
            warn!(
                route_id = id,
                worker_route = %self.route.route_id,
                "record names an unknown routeId, using the worker's route"
            );
            return self.route.clone();
        }

        let mismatched = !envelope.sender_comp_id.is_empty()
            && (envelope.sender_comp_id != self.route.sender_comp_id
                || envelope.target_comp_id != self.route.target_comp_id);
        if mismatched {
            if let Some(matched) = self
                .table
                .matching(&envelope.sender_comp_id, &envelope.target_comp_id)
                .into_iter()
                .find(|route| route.direction == Direction::Input)
            {
                warn!(
                    route_id = %matched.route_id,
                    sender = %envelope.sender_comp_id,
                    target = %envelope.target_comp_id,
                    "resolved destinations by sender/target match; producers should carry routeId"
                );
                return matched;
            }
        }
        self.route.clone()
    }

    /// Route-level dead letter, used when redeliveries are exhausted.
    async fn route_dead_letter(&self, record: &ConsumerRecord, topic: &str) {
        let payload = record.payload_str();
        let envelope = FixEnvelope::decode(&payload).unwrap_or_default().with_error(
            &self.route.route_id,
            "DestinationPermanentError",
            "redelivery budget exhausted",
        );
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "route dead-letter envelope failed to serialise");
                return;
            }
        };
        let record = ProducerRecord::new(topic.to_string(), json.into_bytes())
            .with_header("__TypeId__", "fixMessageEnvelope")
            .with_header("routeId", self.route.route_id.clone());
        if let Err(e) = self.producer.send(record).await {
            error!(topic, error = %e, "route dead-letter publish failed");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
