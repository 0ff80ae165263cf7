//! The immutable, many-reader route table.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use fixgate_endpoint::{EndpointScheme, EndpointUri};
use fixgate_expr::ExprCache;

use crate::error::RoutingError;
use crate::model::{Direction, Route, RoutingConfig};

/// All routes, normalised and validated. Built once at startup and
/// shared read-only across workers.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    global_dead_letter_topic: String,
}

impl RouteTable {
    /// Normalise, validate and pre-compile a parsed configuration.
    pub fn from_config(mut config: RoutingConfig, cache: &ExprCache) -> Result<Self, RoutingError> {
        normalize(&mut config);
        validate(&config)?;
        precompile_expressions(&config, cache);

        info!(routes = config.routes.len(), "routing configuration loaded");
        Ok(Self {
            global_dead_letter_topic: config.global_dead_letter_topic(),
            routes: config.routes.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn from_json(json: &str, cache: &ExprCache) -> Result<Self, RoutingError> {
        Self::from_config(RoutingConfig::from_json(json)?, cache)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn by_id(&self, route_id: &str) -> Option<Arc<Route>> {
        self.routes
            .iter()
            .find(|route| route.route_id == route_id)
            .cloned()
    }

    pub fn by_direction(&self, direction: Direction) -> Vec<Arc<Route>> {
        self.routes
            .iter()
            .filter(|route| route.direction == direction)
            .cloned()
            .collect()
    }

    /// Routes whose comp-id pair matches; the legacy resolution path.
    pub fn matching(&self, sender_comp_id: &str, target_comp_id: &str) -> Vec<Arc<Route>> {
        self.routes
            .iter()
            .filter(|route| {
                route.sender_comp_id == sender_comp_id && route.target_comp_id == target_comp_id
            })
            .cloned()
            .collect()
    }

    pub fn global_dead_letter_topic(&self) -> &str {
        &self.global_dead_letter_topic
    }

    /// Every topic the gateway touches: route input/output topics, kafka
    /// destination topics, per-destination dead-letter topics, and the
    /// global dead-letter topic. Sorted, deduplicated.
    pub fn required_topics(&self) -> Vec<String> {
        let mut topics = HashSet::new();
        topics.insert(self.global_dead_letter_topic.clone());
        for route in &self.routes {
            match route.direction {
                Direction::Input => {
                    topics.insert(route.resolved_input_topic());
                }
                Direction::Output => {
                    topics.insert(route.resolved_output_topic());
                }
            }
            for dest in &route.destination_configs {
                topics.insert(dest.resolved_dead_letter_topic(&route.route_id));
                if let Ok(EndpointUri {
                    scheme: EndpointScheme::Kafka { topic },
                    ..
                }) = EndpointUri::parse(&dest.uri)
                {
                    topics.insert(topic);
                }
            }
        }
        let mut topics: Vec<String> = topics.into_iter().collect();
        topics.sort();
        topics
    }
}

fn normalize(config: &mut RoutingConfig) {
    let template = config.default_destination.clone();
    let global = config.error_handling.clone().unwrap_or_default();

    for route in &mut config.routes {
        route.input_topic = Some(route.resolved_input_topic());
        route.output_topic = Some(route.resolved_output_topic());
        if route.error_handling.is_none() {
            route.error_handling = Some(global.clone());
        }
        for dest in &mut route.destination_configs {
            if let Some(template) = &template {
                dest.apply_template(template);
            }
            dest.apply_load_defaults();
        }
    }
}

fn validate(config: &RoutingConfig) -> Result<(), RoutingError> {
    let mut seen = HashSet::new();
    for route in &config.routes {
        if route.route_id.trim().is_empty() {
            return Err(RoutingError::Invalid("route with empty routeId".into()));
        }
        if !seen.insert(route.route_id.clone()) {
            return Err(RoutingError::Invalid(format!(
                "duplicate routeId '{}'",
                route.route_id
            )));
        }
        if route.sender_comp_id.is_empty() || route.target_comp_id.is_empty() {
            return Err(RoutingError::Invalid(format!(
                "route '{}' is missing senderCompId/targetCompId",
                route.route_id
            )));
        }
        if route.destination_configs.is_empty() {
            return Err(RoutingError::Invalid(format!(
                "route '{}' has no destinations",
                route.route_id
            )));
        }
        for dest in &route.destination_configs {
            EndpointUri::parse(&dest.uri)?;
        }
    }
    Ok(())
}

/// Pre-compile every partition expression so the first message pays no
/// compile cost. A compile failure is logged, not fatal: the route falls
/// back to default partitioning at runtime.
fn precompile_expressions(config: &RoutingConfig, cache: &ExprCache) {
    for route in &config.routes {
        if route.direction != Direction::Output {
            continue;
        }
        if let Some(expression) = route.partition_expression() {
            if let Err(e) = cache.precompile(expression) {
                warn!(
                    route_id = %route.route_id,
                    expression,
                    error = %e,
                    "partition expression failed to compile"
                );
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
