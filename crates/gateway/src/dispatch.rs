//! The destination dispatcher.
//!
//! For one envelope and one route: iterate the destinations in declared
//! order, filter by message type, send synchronously with bounded retry
//! on network-classified errors, and divert terminal failures to the
//! destination's dead-letter topic. The next destination never starts
//! before the previous one has terminated — per-partition ordering
//! depends on it, and `parallelProcessing` does not relax it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, trace, warn};

use fixgate_broker::{BrokerProducer, BrokerUri, ProducerRecord};
use fixgate_core::FixEnvelope;
use fixgate_endpoint::{
    message_indicates_network, DirectRegistry, EndpointScheme, EndpointSender, EndpointUri,
    TcpLineSender,
};
use fixgate_routing::{DestinationConfig, Route};

use crate::error::GatewayError;

/// One destination send walks `PENDING → IN_FLIGHT` and terminates in
/// `SUCCESS`, `DEAD_LETTERED` or `ABORTED`; `RETRY_WAIT` sits between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Pending,
    InFlight,
    RetryWait,
    Success,
    DeadLettered,
    Aborted,
}

impl std::fmt::Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SendState::Pending => "PENDING",
            SendState::InFlight => "IN_FLIGHT",
            SendState::RetryWait => "RETRY_WAIT",
            SendState::Success => "SUCCESS",
            SendState::DeadLettered => "DEAD_LETTERED",
            SendState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// What happened across one route's destinations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub skipped: usize,
    pub dead_lettered: usize,
}

/// Sends one envelope to the destinations of one route.
pub struct Dispatcher {
    producer: Arc<dyn BrokerProducer>,
    directs: DirectRegistry,
    shutdown: watch::Receiver<bool>,
    /// Cached TCP senders keyed by resolved URI, so `reuseChannel`
    /// endpoints keep their connection across envelopes.
    tcp_senders: Mutex<HashMap<String, Arc<TcpLineSender>>>,
}

impl Dispatcher {
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        directs: DirectRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            producer,
            directs,
            shutdown,
            tcp_senders: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch an envelope across the route's destinations in declared
    /// order.
    ///
    /// Returns `Err(Interrupted)` when shutdown cut the dispatch short
    /// and `Err(StopOnException)` when a failing destination aborted the
    /// remainder — in both cases the caller must not commit the record.
    pub async fn dispatch(
        &self,
        envelope: &FixEnvelope,
        route: &Route,
    ) -> Result<DispatchSummary, GatewayError> {
        let mut summary = DispatchSummary::default();

        for dest in &route.destination_configs {
            if !dest.accepts_msg_type(&envelope.msg_type) {
                trace!(
                    route_id = %route.route_id,
                    uri = %dest.uri,
                    msg_type = %envelope.msg_type,
                    "destination skipped by message-type filter"
                );
                summary.skipped += 1;
                continue;
            }

            let uri = EndpointUri::parse(&dest.uri)?
                .with_params(&dest.endpoint_parameters)
                .with_netty_defaults();

            match self.send_with_retry(envelope, route, dest, &uri).await {
                SendState::Success => summary.delivered += 1,
                SendState::Aborted => return Err(GatewayError::Interrupted),
                SendState::DeadLettered => {
                    summary.dead_lettered += 1;
                    if dest.stop_on_exception {
                        warn!(
                            route_id = %route.route_id,
                            uri = %dest.uri,
                            "stopOnException set, aborting remaining destinations"
                        );
                        return Err(GatewayError::StopOnException(dest.uri.clone()));
                    }
                }
                state => {
                    // The retry loop only exits through terminal states.
                    error!(state = %state, uri = %dest.uri, "send loop returned a non-terminal state");
                }
            }
        }

        debug!(
            route_id = %route.route_id,
            delivered = summary.delivered,
            skipped = summary.skipped,
            dead_lettered = summary.dead_lettered,
            "dispatch complete"
        );
        Ok(summary)
    }

    /// Drive one destination through the send state machine.
    async fn send_with_retry(
        &self,
        envelope: &FixEnvelope,
        route: &Route,
        dest: &DestinationConfig,
        uri: &EndpointUri,
    ) -> SendState {
        let max_attempts = u64::from(dest.max_retries) + 1;
        let timeout = Duration::from_millis(dest.timeout_ms());
        let mut state = SendState::Pending;
        let mut attempt = 0u64;
        let mut failure: Option<(&'static str, String)> = None;

        while attempt < max_attempts {
            if self.is_shutdown() {
                state = SendState::Aborted;
                break;
            }
            attempt += 1;
            state = SendState::InFlight;
            trace!(uri = %uri, attempt, max_attempts, state = %state, "sending");

            let result = match tokio::time::timeout(timeout, self.send_once(envelope, uri)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Endpoint(
                    fixgate_endpoint::EndpointError::Timeout(dest.timeout_ms()),
                )),
            };

            let err = match result {
                Ok(()) => {
                    state = SendState::Success;
                    debug!(uri = %uri, attempt, "delivered");
                    break;
                }
                Err(err) => err,
            };

            let network = is_network_failure(&err);
            if network && attempt < max_attempts {
                state = SendState::RetryWait;
                debug!(
                    uri = %uri,
                    attempt,
                    retry_delay_ms = dest.retry_delay_ms,
                    error = %err,
                    state = %state,
                    "network error, retrying"
                );
                if self.sleep_interruptible(dest.retry_delay_ms).await {
                    state = SendState::Aborted;
                    break;
                }
                continue;
            }

            warn!(
                route_id = %route.route_id,
                uri = %uri,
                attempt,
                network,
                error = %err,
                "destination failed terminally"
            );
            failure = Some((
                if network {
                    "NetworkError"
                } else {
                    "DestinationPermanentError"
                },
                err.to_string(),
            ));
            state = SendState::DeadLettered;
            break;
        }

        if state == SendState::DeadLettered {
            let (error_type, message) = failure
                .unwrap_or(("NetworkError", "retry budget exhausted".to_string()));
            self.dead_letter(envelope, route, dest, error_type, &message)
                .await;
        }
        state
    }

    /// One attempt against the resolved endpoint.
    async fn send_once(&self, envelope: &FixEnvelope, uri: &EndpointUri) -> Result<(), GatewayError> {
        match &uri.scheme {
            EndpointScheme::NettyTcp { .. } => {
                let sender = self.tcp_sender(uri).await?;
                sender.send(&envelope.raw_message).await?;
                Ok(())
            }
            EndpointScheme::Direct { name } => {
                let sender = self.directs.sender(name).ok_or_else(|| {
                    fixgate_endpoint::EndpointError::ChannelUnavailable(name.clone())
                })?;
                sender.send(&envelope.raw_message).await?;
                Ok(())
            }
            EndpointScheme::Kafka { .. } => {
                // Broker-bound destinations go through the broker URI
                // form; producer parameters ride in its query string.
                let broker_uri = BrokerUri::parse(&uri.to_uri_string())?;
                let record =
                    ProducerRecord::new(broker_uri.topic, envelope.to_json()?.into_bytes())
                        .with_header("__TypeId__", "fixMessageEnvelope")
                        .with_header("sessionId", envelope.session_id.clone())
                        .with_header("senderCompId", envelope.sender_comp_id.clone())
                        .with_header("targetCompId", envelope.target_comp_id.clone());
                self.producer.send(record).await?;
                Ok(())
            }
        }
    }

    async fn tcp_sender(&self, uri: &EndpointUri) -> Result<Arc<TcpLineSender>, GatewayError> {
        let key = uri.to_uri_string();
        let mut senders = self.tcp_senders.lock().await;
        if let Some(found) = senders.get(&key) {
            return Ok(found.clone());
        }
        let sender = Arc::new(TcpLineSender::from_uri(uri)?);
        senders.insert(key, sender.clone());
        Ok(sender)
    }

    /// Publish the envelope, stamped with the error fields, to the
    /// destination's dead-letter topic. A failing dead-letter publish is
    /// logged; the record still counts as terminally handled.
    async fn dead_letter(
        &self,
        envelope: &FixEnvelope,
        route: &Route,
        dest: &DestinationConfig,
        error_type: &str,
        message: &str,
    ) {
        let topic = dest.resolved_dead_letter_topic(&route.route_id);
        let stamped = envelope
            .clone()
            .with_error(&route.route_id, error_type, message);
        let json = match stamped.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(topic = %topic, error = %e, "dead-letter envelope failed to serialise");
                return;
            }
        };

        let record = ProducerRecord::new(topic.clone(), json.into_bytes())
            .with_header("__TypeId__", "fixMessageEnvelope")
            .with_header("routeId", route.route_id.clone())
            .with_header("errorType", error_type.to_string());
        match self.producer.send(record).await {
            Ok(_) => warn!(topic = %topic, route_id = %route.route_id, "envelope dead-lettered"),
            Err(e) => error!(topic = %topic, error = %e, "dead-letter publish failed"),
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep the retry delay, returning `true` if shutdown interrupted it.
    async fn sleep_interruptible(&self, delay_ms: u64) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
            // A closed channel also means the supervisor is gone.
            _ = shutdown.wait_for(|stopping| *stopping) => true,
        }
    }
}

/// Network classification: structural kinds first, then the
/// case-insensitive token scan over the rendered message.
fn is_network_failure(err: &GatewayError) -> bool {
    match err {
        GatewayError::Endpoint(e) => e.is_network() || message_indicates_network(&e.to_string()),
        GatewayError::Broker(e) => {
            matches!(e, fixgate_broker::BrokerError::Unreachable(_))
                || message_indicates_network(&e.to_string())
        }
        other => message_indicates_network(&other.to_string()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
