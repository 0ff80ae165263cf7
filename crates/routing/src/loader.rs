//! Locating and loading the routing document.
//!
//! Resolution priority: (1) an explicit path handed in by the caller,
//! (2) the `FIX_ROUTING_CONFIG_PATH` environment variable, (3) the path
//! configured in the gateway's own settings file, (4) the packaged
//! default resource.

use std::path::{Path, PathBuf};

use tracing::info;

use fixgate_expr::ExprCache;

use crate::error::RoutingError;
use crate::table::RouteTable;

/// Environment variable naming the routing document.
pub const ROUTING_CONFIG_ENV: &str = "FIX_ROUTING_CONFIG_PATH";

/// The packaged default: no routes, gateway idles.
const PACKAGED_DEFAULT: &str = include_str!("routing-config.json");

/// Where the routing document was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Packaged,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Packaged => write!(f, "<packaged routing-config.json>"),
        }
    }
}

/// Apply the resolution priority.
pub fn resolve_source(explicit: Option<&Path>, configured: Option<&Path>) -> ConfigSource {
    resolve_with_env(
        explicit,
        std::env::var(ROUTING_CONFIG_ENV).ok(),
        configured,
    )
}

fn resolve_with_env(
    explicit: Option<&Path>,
    env_path: Option<String>,
    configured: Option<&Path>,
) -> ConfigSource {
    if let Some(path) = explicit {
        return ConfigSource::File(path.to_path_buf());
    }
    if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        return ConfigSource::File(PathBuf::from(path));
    }
    if let Some(path) = configured {
        return ConfigSource::File(path.to_path_buf());
    }
    ConfigSource::Packaged
}

/// Resolve, read, and build the route table.
pub fn load(
    explicit: Option<&Path>,
    configured: Option<&Path>,
    cache: &ExprCache,
) -> Result<RouteTable, RoutingError> {
    let source = resolve_source(explicit, configured);
    info!(source = %source, "loading routing configuration");
    let json = match &source {
        ConfigSource::File(path) => std::fs::read_to_string(path)?,
        ConfigSource::Packaged => PACKAGED_DEFAULT.to_string(),
    };
    RouteTable::from_json(&json, cache)
}

// ── Tests ───────────────────────────────────────────────────────────
