//! Gateway process settings.
//!
//! Parsed from `fixgate.toml` with environment variable overrides
//! (`FIXGATE_SECTION_KEY` → `section.key`). The routing table itself is a
//! separate JSON document; this file only carries where to find it plus
//! broker, HTTP and shutdown knobs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ── Sections ────────────────────────────────────────────────────────

fn default_broker_mode() -> String {
    "memory".to_string()
}

fn default_serializer() -> String {
    "string".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_health_window_secs() -> u64 {
    10
}

fn default_health_interval_secs() -> u64 {
    1
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Broker backend. `memory` runs the in-process log; a Kafka-backed
    /// client plugs in behind the same seam.
    #[serde(default = "default_broker_mode")]
    pub mode: String,

    /// Producer key serializer name, passed through on `kafka:` URIs.
    #[serde(default = "default_serializer")]
    pub key_serializer: String,

    /// Producer value serializer name, passed through on `kafka:` URIs.
    #[serde(default = "default_serializer")]
    pub value_serializer: String,

    /// Producer request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long to wait for the bus at startup before giving up.
    #[serde(default = "default_health_window_secs")]
    pub health_check_window_secs: u64,

    /// Interval between startup health probes.
    #[serde(default = "default_health_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            key_serializer: default_serializer(),
            value_serializer: default_serializer(),
            request_timeout_ms: default_request_timeout_ms(),
            health_check_window_secs: default_health_window_secs(),
            health_check_interval_secs: default_health_interval_secs(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8080
}

/// Introspection API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            port: default_http_port(),
        }
    }
}

fn default_drain_deadline_secs() -> u64 {
    10
}

/// Graceful-stop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    /// Upper bound on draining in-flight dispatches at shutdown.
    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_deadline_secs: default_drain_deadline_secs(),
        }
    }
}

// ── Top-level config ────────────────────────────────────────────────

/// Full gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub shutdown: ShutdownSettings,

    /// Routing document path, third in the resolution priority after the
    /// CLI flag and `FIX_ROUTING_CONFIG_PATH`.
    #[serde(default)]
    pub routing_config_path: Option<PathBuf>,
}

impl GatewayConfig {
    /// Parse from a TOML string, apply env overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, GatewayError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from an explicit path, from `fixgate.toml` in the working
    /// directory, or fall back to defaults (still env-overridable).
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new("fixgate.toml");
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    let mut config = Self::default();
                    config.apply_env_overrides();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    /// `FIXGATE_SECTION_KEY` overrides `section.key`:
    /// - `FIXGATE_BROKER_MODE` → `broker.mode`
    /// - `FIXGATE_HTTP_ENABLED` → `http.enabled`
    /// - `FIXGATE_HTTP_PORT` → `http.port`
    /// - `FIXGATE_SHUTDOWN_DRAIN_DEADLINE_SECS` → `shutdown.drain_deadline_secs`
    /// - `FIXGATE_ROUTING_CONFIG_PATH` → `routing_config_path`
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FIXGATE_BROKER_MODE") {
            self.broker.mode = v;
        }
        if let Ok(v) = std::env::var("FIXGATE_HTTP_ENABLED") {
            if let Ok(enabled) = v.parse() {
                self.http.enabled = enabled;
            }
        }
        if let Ok(v) = std::env::var("FIXGATE_HTTP_PORT") {
            if let Ok(port) = v.parse() {
                self.http.port = port;
            }
        }
        if let Ok(v) = std::env::var("FIXGATE_SHUTDOWN_DRAIN_DEADLINE_SECS") {
            if let Ok(secs) = v.parse() {
                self.shutdown.drain_deadline_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("FIXGATE_ROUTING_CONFIG_PATH") {
            if !v.is_empty() {
                self.routing_config_path = Some(PathBuf::from(v));
            }
        }
    }

    fn validate(&self) -> Result<(), GatewayError> {
        match self.broker.mode.as_str() {
            "memory" => Ok(()),
            other => Err(GatewayError::Config(format!(
                "unsupported broker mode '{other}', expected 'memory'"
            ))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
