//! The typed routing model, immutable after load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fixgate_endpoint::EndpointUri;

// ── Direction & partition strategy ──────────────────────────────────

/// Which way a route moves messages relative to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Broker topic → downstream endpoints.
    Input,
    /// Listener endpoints → broker topic.
    Output,
}

/// How output records are assigned to broker partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionStrategy {
    /// Broker default partitioning, no key.
    #[default]
    None,
    /// Record key computed by the partition expression.
    Key,
    /// Explicit partition number computed by the partition expression.
    Expr,
}

// ── Destinations ────────────────────────────────────────────────────

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// One downstream target of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    /// Scheme-prefixed target: `netty:tcp://host:port`, `kafka:topic`,
    /// `direct:name`.
    pub uri: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts, in milliseconds. No jitter, no
    /// backoff.
    #[serde(rename = "retryDelay", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-send timeout in milliseconds. When absent, netty destinations
    /// resolve to 10000 at load time and everything else to 5000.
    #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Dead-letter topic override; defaults to
    /// `dead-letter-<routeId>-<endpointSlug>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_topic: Option<String>,

    /// Free-form query-string parameters appended to the URI.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_parameters: BTreeMap<String, String>,

    /// Accepted for compatibility; the dispatcher never reorders on it.
    #[serde(default)]
    pub parallel_processing: bool,

    /// Abort the remaining destinations when this one fails terminally.
    #[serde(default)]
    pub stop_on_exception: bool,

    /// FIX message types this destination accepts. Empty or containing
    /// `"*"` means all.
    #[serde(default)]
    pub msg_types: Vec<String>,
}

impl DestinationConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: None,
            dead_letter_topic: None,
            endpoint_parameters: BTreeMap::new(),
            parallel_processing: false,
            stop_on_exception: false,
            msg_types: Vec::new(),
        }
    }

    fn is_netty(&self) -> bool {
        self.uri.contains("netty:")
    }

    /// The message-type filter: empty or `"*"` accepts everything.
    pub fn accepts_msg_type(&self, msg_type: &str) -> bool {
        self.msg_types.is_empty()
            || self.msg_types.iter().any(|t| t == "*")
            || self.msg_types.iter().any(|t| t == msg_type)
    }

    /// Per-send timeout with the load-time defaults applied.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
            .unwrap_or(if self.is_netty() { 10_000 } else { 5_000 })
    }

    /// The dead-letter topic for this destination under the given route.
    pub fn resolved_dead_letter_topic(&self, route_id: &str) -> String {
        if let Some(topic) = &self.dead_letter_topic {
            return topic.clone();
        }
        let slug = EndpointUri::parse(&self.uri)
            .map(|uri| uri.endpoint_slug())
            .unwrap_or_else(|_| sanitize(&self.uri));
        format!("dead-letter-{route_id}-{slug}")
    }

    /// Load-time normalisation: netty destinations lacking explicit
    /// timeouts receive `timeout=10000` and connect/request timeouts of
    /// 5000 in their endpoint parameters.
    pub(crate) fn apply_load_defaults(&mut self) {
        if self.is_netty() {
            if self.timeout_ms.is_none() {
                self.timeout_ms = Some(10_000);
            }
            for (key, value) in [("connectTimeout", "5000"), ("requestTimeout", "5000")] {
                self.endpoint_parameters
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    /// Fill unset knobs from the configuration-wide destination template.
    pub(crate) fn apply_template(&mut self, template: &DestinationConfig) {
        if self.dead_letter_topic.is_none() {
            self.dead_letter_topic = template.dead_letter_topic.clone();
        }
        if self.timeout_ms.is_none() {
            self.timeout_ms = template.timeout_ms;
        }
        if self.msg_types.is_empty() {
            self.msg_types = template.msg_types.clone();
        }
        for (key, value) in &template.endpoint_parameters {
            self.endpoint_parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

// ── Error handling ──────────────────────────────────────────────────

fn default_max_redeliveries() -> u32 {
    1
}

fn default_redelivery_delay_ms() -> u64 {
    500
}

fn default_dead_letter_topic() -> String {
    "fix-dead-letter".to_string()
}

/// Redelivery and dead-letter knobs, at route or global level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingConfig {
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    #[serde(rename = "redeliveryDelay", default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,

    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: default_max_redeliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            dead_letter_topic: default_dead_letter_topic(),
        }
    }
}

// ── Routes ──────────────────────────────────────────────────────────

/// One configured mapping between a broker topic and its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub route_id: String,

    #[serde(rename = "type")]
    pub direction: Direction,

    pub sender_comp_id: String,
    pub target_comp_id: String,

    /// Auto-derived as `fix.<sender>.<target>.input` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_topic: Option<String>,

    /// Auto-derived as `fix.<sender>.<target>.output` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_topic: Option<String>,

    pub destination_configs: Vec<DestinationConfig>,

    /// Route-level override of the global error handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandlingConfig>,

    /// OUTPUT routes only.
    #[serde(default)]
    pub partition_strategy: PartitionStrategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_expression: Option<String>,
}

impl Route {
    /// Input topic with auto-derivation applied.
    pub fn resolved_input_topic(&self) -> String {
        self.input_topic
            .clone()
            .unwrap_or_else(|| self.derived_topic("input"))
    }

    /// Output topic with auto-derivation applied.
    pub fn resolved_output_topic(&self) -> String {
        self.output_topic
            .clone()
            .unwrap_or_else(|| self.derived_topic("output"))
    }

    fn derived_topic(&self, direction: &str) -> String {
        format!(
            "fix.{}.{}.{direction}",
            self.sender_comp_id, self.target_comp_id
        )
    }

    /// Consumer-group id for this route's input consumer.
    pub fn consumer_group_id(&self) -> String {
        format!("fix-router-{}", sanitize(&self.route_id))
    }

    /// Session identity stamped on envelopes built by this route.
    pub fn session_id(&self) -> String {
        format!("FIX.4.4:{}->{}", self.sender_comp_id, self.target_comp_id)
    }

    /// Non-empty partition expression, if configured.
    pub fn partition_expression(&self) -> Option<&str> {
        self.partition_expression
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
    }
}

/// Lowercase, with non-alphanumerics folded to `-`.
fn sanitize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

// ── Top-level configuration ─────────────────────────────────────────

/// The whole routing document: routes plus global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default)]
    pub routes: Vec<Route>,

    /// Global error-handling defaults applied to routes without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandlingConfig>,

    /// Template whose set fields seed every destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_destination: Option<DestinationConfig>,
}

impl RoutingConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The configuration-wide dead-letter topic.
    pub fn global_dead_letter_topic(&self) -> String {
        self.error_handling
            .clone()
            .unwrap_or_default()
            .dead_letter_topic
    }
}

// ── Tests ───────────────────────────────────────────────────────────
