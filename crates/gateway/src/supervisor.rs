//! Gateway lifecycle: startup ordering, worker ownership, graceful stop.
//!
//! Startup order is bus reachable → topics ensured → workers constructed.
//! Shutdown signals every worker, drains in-flight dispatches within the
//! configured deadline, then flushes and releases the shared producer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fixgate_broker::{BrokerClient, BrokerError, BrokerProducer, ConsumerSettings, TopicAdmin};
use fixgate_endpoint::{DirectRegistry, EndpointScheme, EndpointUri, TcpLineListener};
use fixgate_expr::ExprCache;
use fixgate_routing::{Direction, RouteTable};

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::http;
use crate::input::InputWorker;
use crate::output::OutputWorker;

/// Builds and owns the gateway's runtime pieces.
pub struct Supervisor;

impl Supervisor {
    /// Bring the gateway up. Fails (exit code 1 territory) when the bus
    /// stays unreachable through the health-check window.
    pub async fn start(
        config: &GatewayConfig,
        table: Arc<RouteTable>,
        broker: Arc<dyn BrokerClient>,
        directs: DirectRegistry,
        cache: Arc<ExprCache>,
    ) -> Result<RunningGateway, GatewayError> {
        let admin = broker.admin();
        Self::await_broker(&*admin, config).await?;
        Self::ensure_topics(&*admin, &table).await;

        let producer = broker.producer();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher::new(
            producer.clone(),
            directs.clone(),
            shutdown_rx.clone(),
        ));

        let mut workers: Vec<(String, JoinHandle<()>)> = Vec::new();
        let mut listeners: Vec<TcpLineListener> = Vec::new();

        for route in table.by_direction(Direction::Input) {
            let consumer = broker.consumer(
                &route.resolved_input_topic(),
                ConsumerSettings::manual(route.consumer_group_id()),
            );
            let worker = InputWorker::new(
                route.clone(),
                table.clone(),
                consumer,
                dispatcher.clone(),
                producer.clone(),
                shutdown_rx.clone(),
            );
            workers.push((
                format!("input-{}", route.route_id),
                tokio::spawn(worker.run()),
            ));
        }

        for route in table.by_direction(Direction::Output) {
            for dest in &route.destination_configs {
                let uri = EndpointUri::parse(&dest.uri)?;
                let rx = match &uri.scheme {
                    EndpointScheme::NettyTcp { host, port } => {
                        let (listener, rx) = TcpLineListener::bind(host, *port, 64).await?;
                        listeners.push(listener);
                        rx
                    }
                    EndpointScheme::Direct { name } => directs.register(name, 64),
                    EndpointScheme::Kafka { .. } => {
                        warn!(
                            route_id = %route.route_id,
                            uri = %dest.uri,
                            "kafka endpoints cannot act as listeners, skipping"
                        );
                        continue;
                    }
                };
                let worker = OutputWorker::new(
                    route.clone(),
                    dest.uri.clone(),
                    rx,
                    producer.clone(),
                    cache.clone(),
                    shutdown_rx.clone(),
                );
                workers.push((
                    format!("output-{}-{}", route.route_id, uri.endpoint_slug()),
                    tokio::spawn(worker.run()),
                ));
            }
        }

        let http = if config.http.enabled {
            let port = config.http.port;
            let state = table.clone();
            let shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = http::serve(port, state, shutdown).await {
                    warn!(error = %e, "introspection API stopped with error");
                }
            }))
        } else {
            None
        };

        info!(
            routes = table.len(),
            workers = workers.len(),
            "gateway started"
        );
        Ok(RunningGateway {
            shutdown: shutdown_tx,
            workers,
            listeners,
            http,
            producer,
            drain_deadline: Duration::from_secs(config.shutdown.drain_deadline_secs),
        })
    }

    /// Probe the bus until it answers or the window closes.
    async fn await_broker(admin: &dyn TopicAdmin, config: &GatewayConfig) -> Result<(), GatewayError> {
        let window = Duration::from_secs(config.broker.health_check_window_secs);
        let interval = Duration::from_secs(config.broker.health_check_interval_secs.max(1));
        let deadline = Instant::now() + window;

        loop {
            match admin.ping().await {
                Ok(()) => {
                    info!("broker reachable");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "broker not reachable yet"),
            }
            if Instant::now() + interval >= deadline {
                return Err(GatewayError::Supervisor(format!(
                    "broker unreachable after {}s health-check window",
                    window.as_secs()
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Create every required topic with partition count 1 and replication
    /// factor 1. Missing creation privilege is logged, never fatal —
    /// topics may be auto-created on first use.
    async fn ensure_topics(admin: &dyn TopicAdmin, table: &RouteTable) {
        for topic in table.required_topics() {
            match admin.ensure_topic(&topic, 1, 1).await {
                Ok(()) => debug!(topic = %topic, "topic ensured"),
                Err(BrokerError::PermissionDenied(reason)) => warn!(
                    topic = %topic,
                    reason = %reason,
                    "no privilege to create topic, relying on auto-creation"
                ),
                Err(e) => warn!(topic = %topic, error = %e, "topic creation failed"),
            }
        }
    }
}

/// Handle to a started gateway.
pub struct RunningGateway {
    shutdown: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<()>)>,
    listeners: Vec<TcpLineListener>,
    http: Option<JoinHandle<()>>,
    producer: Arc<dyn BrokerProducer>,
    drain_deadline: Duration,
}

impl RunningGateway {
    /// Bound addresses of the TCP listener endpoints, in construction
    /// order. Lets callers discover ports bound as 0.
    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Graceful stop: signal, drain within the deadline, flush the
    /// producer.
    pub async fn stop(mut self) {
        info!("gateway stopping");
        let _ = self.shutdown.send(true);
        for listener in &self.listeners {
            listener.shutdown();
        }

        let deadline = Instant::now() + self.drain_deadline;
        for (name, mut handle) in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => debug!(worker = %name, "worker drained"),
                Ok(Err(e)) => warn!(worker = %name, error = %e, "worker ended abnormally"),
                Err(_) => {
                    warn!(worker = %name, "drain deadline exceeded, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(mut http) = self.http.take() {
            // The HTTP server observes the same shutdown signal; give it a
            // moment before cutting it off.
            if tokio::time::timeout(Duration::from_secs(1), &mut http)
                .await
                .is_err()
            {
                debug!("introspection API still draining, aborting");
                http.abort();
            }
        }

        if let Err(e) = self.producer.flush().await {
            warn!(error = %e, "producer flush failed during shutdown");
        }
        info!("gateway stopped");
    }
}

/// Block until SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigint = signal(SignalKind::interrupt());
        let sigterm = signal(SignalKind::terminate());
        match (sigint, sigterm) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    use fixgate_broker::MemoryBroker;
    use fixgate_core::FixEnvelope;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    fn test_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.http.enabled = false;
        config.broker.health_check_window_secs = 2;
        config.shutdown.drain_deadline_secs = 3;
        config
    }

    async fn start_gateway(
        routes_json: &str,
    ) -> (MemoryBroker, DirectRegistry, Arc<ExprCache>, RunningGateway) {
        let broker = MemoryBroker::new();
        let directs = DirectRegistry::new();
        let cache = Arc::new(ExprCache::new());
        let table = Arc::new(RouteTable::from_json(routes_json, &cache).unwrap());
        let running = Supervisor::start(
            &test_config(),
            table,
            Arc::new(broker.clone()),
            directs.clone(),
            cache.clone(),
        )
        .await
        .unwrap();
        (broker, directs, cache, running)
    }

    #[tokio::test]
    async fn startup_ensures_required_topics() {
        let routes = r#"{ "routes": [
          { "routeId": "R1", "type": "INPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
            "destinationConfigs": [ { "uri": "direct:sink" } ] } ] }"#;
        let (broker, directs, _cache, running) = start_gateway(routes).await;
        let _sink = directs.register("sink", 8);

        let topics = broker.topic_names().await;
        assert!(topics.contains(&"fix.GTWY.EXEC.input".to_string()));
        assert!(topics.contains(&"fix-dead-letter".to_string()));
        assert!(topics.contains(&"dead-letter-R1-direct-sink".to_string()));

        running.stop().await;
    }

    #[tokio::test]
    async fn input_route_end_to_end() {
        let routes = r#"{ "routes": [
          { "routeId": "R1", "type": "INPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
            "destinationConfigs": [ { "uri": "direct:sink" } ] } ] }"#;
        let broker = MemoryBroker::new();
        let directs = DirectRegistry::new();
        let mut sink = directs.register("sink", 8);
        let cache = Arc::new(ExprCache::new());
        let table = Arc::new(RouteTable::from_json(routes, &cache).unwrap());
        let running = Supervisor::start(
            &test_config(),
            table,
            Arc::new(broker.clone()),
            directs.clone(),
            cache,
        )
        .await
        .unwrap();

        let envelope = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        broker
            .producer()
            .send(fixgate_broker::ProducerRecord::new(
                "fix.GTWY.EXEC.input",
                envelope.to_json().unwrap().into_bytes(),
            ))
            .await
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), sink.recv())
            .await
            .expect("dispatched to the direct endpoint")
            .unwrap();
        assert_eq!(raw, envelope.raw_message);

        running.stop().await;
    }

    #[tokio::test]
    async fn output_route_end_to_end_over_tcp() {
        // Listener on an ephemeral port; a client writes one FIX line and
        // the gateway publishes a keyed envelope to the output topic.
        let routes = r#"{ "routes": [
          { "routeId": "out", "type": "OUTPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
            "outputTopic": "fix.out", "partitionStrategy": "KEY", "partitionExpression": "Symbol",
            "destinationConfigs": [ { "uri": "netty:tcp://127.0.0.1:0" } ] } ] }"#;
        let (broker, _directs, _cache, running) = start_gateway(routes).await;

        let addrs = running.listener_addrs();
        assert_eq!(addrs.len(), 1);

        let mut client = tokio::net::TcpStream::connect(addrs[0]).await.unwrap();
        client.write_all(ORDER.as_bytes()).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        client.flush().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let record = loop {
            let records = broker.topic_records("fix.out").await;
            if let Some(record) = records.into_iter().next() {
                break record;
            }
            assert!(tokio::time::Instant::now() < deadline, "expected a published envelope");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        assert_eq!(record.key.as_deref(), Some("AAPL"));
        assert_eq!(record.header("routeId"), Some("out"));
        let envelope = FixEnvelope::decode(&record.payload_str()).unwrap();
        assert_eq!(envelope.msg_type, "D");

        running.stop().await;
    }

    #[tokio::test]
    async fn stop_is_prompt_and_idempotent_workers_drain() {
        let routes = r#"{ "routes": [
          { "routeId": "R1", "type": "INPUT", "senderCompId": "GTWY", "targetCompId": "EXEC",
            "destinationConfigs": [ { "uri": "direct:sink" } ] } ] }"#;
        let (_broker, directs, _cache, running) = start_gateway(routes).await;
        let _sink = directs.register("sink", 8);

        let started = Instant::now();
        running.stop().await;
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "idle workers must drain promptly"
        );
    }

    #[tokio::test]
    async fn empty_route_table_still_starts() {
        let (_broker, _directs, _cache, running) = start_gateway(r#"{ "routes": [] }"#).await;
        assert!(running.listener_addrs().is_empty());
        running.stop().await;
    }
}
