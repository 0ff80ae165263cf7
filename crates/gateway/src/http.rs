//! HTTP introspection surface.
//!
//! Read-only views over the loaded route table:
//! `GET /api/routing/routes`, `GET /api/routing/match`,
//! `GET /api/routing/health`, `GET /api/routing/config`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use fixgate_endpoint::EndpointUri;
use fixgate_routing::{Route, RouteTable};

use crate::error::GatewayError;

/// Build the introspection router.
pub fn build_router(table: Arc<RouteTable>) -> Router {
    Router::new()
        .route("/api/routing/routes", get(routes))
        .route("/api/routing/match", get(match_routes))
        .route("/api/routing/health", get(health))
        .route("/api/routing/config", get(config))
        .layer(CorsLayer::permissive())
        .with_state(table)
}

/// Serve until the shutdown signal flips.
pub async fn serve(
    port: u16,
    table: Arc<RouteTable>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let app = build_router(table);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| GatewayError::Supervisor(format!("introspection API bind failed: {e}")))?;
    info!(port, "introspection API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        })
        .await
        .map_err(|e| GatewayError::Supervisor(format!("introspection API failed: {e}")))
}

// ── Handlers ────────────────────────────────────────────────────────

async fn routes(State(table): State<Arc<RouteTable>>) -> Json<Vec<Route>> {
    Json(all_routes(&table))
}

#[derive(Debug, Deserialize)]
struct MatchParams {
    #[serde(rename = "senderCompId", default)]
    sender_comp_id: String,
    #[serde(rename = "targetCompId", default)]
    target_comp_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchResponse {
    has_route: bool,
    routes: Vec<Route>,
    resolved_destinations: Vec<String>,
}

async fn match_routes(
    State(table): State<Arc<RouteTable>>,
    Query(params): Query<MatchParams>,
) -> Json<MatchResponse> {
    let matches = table.matching(&params.sender_comp_id, &params.target_comp_id);
    let resolved_destinations = matches
        .iter()
        .flat_map(|route| route.destination_configs.iter())
        .map(|dest| {
            EndpointUri::parse(&dest.uri)
                .map(|uri| {
                    uri.with_params(&dest.endpoint_parameters)
                        .to_uri_string()
                })
                .unwrap_or_else(|_| dest.uri.clone())
        })
        .collect();

    Json(MatchResponse {
        has_route: !matches.is_empty(),
        routes: matches.iter().map(|route| (**route).clone()).collect(),
        resolved_destinations,
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    total_routes: usize,
    routes: Vec<Route>,
}

async fn config(State(table): State<Arc<RouteTable>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        total_routes: table.len(),
        routes: all_routes(&table),
    })
}

fn all_routes(table: &RouteTable) -> Vec<Route> {
    table.routes().iter().map(|route| (**route).clone()).collect()
}

// ── Tests ───────────────────────────────────────────────────────────
