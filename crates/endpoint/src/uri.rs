//! Endpoint URI parsing and parameter merging.

use std::collections::BTreeMap;

use crate::error::EndpointError;

/// Netty send defaults appended by the dispatcher when the caller did not
/// supply them. User-supplied values are never overridden.
pub const NETTY_SEND_DEFAULTS: &[(&str, &str)] = &[
    ("connectTimeout", "2000"),
    ("requestTimeout", "2000"),
    ("disconnect", "true"),
    ("reuseChannel", "false"),
    ("sync", "true"),
];

/// The dispatchable URI schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointScheme {
    /// Line-oriented TCP peer.
    NettyTcp { host: String, port: u16 },
    /// In-process channel.
    Direct { name: String },
    /// Re-route onto a broker topic.
    Kafka { topic: String },
}

/// A parsed endpoint URI: scheme plus query-string parameters.
///
/// Parameters are kept in a `BTreeMap` so the rebuilt URI string is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    pub scheme: EndpointScheme,
    pub params: BTreeMap<String, String>,
}

impl EndpointUri {
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let (base, query) = match raw.split_once('?') {
            Some((base, query)) => (base, query),
            None => (raw, ""),
        };

        let invalid = |reason: &str| EndpointError::InvalidUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let scheme = if let Some(rest) = base.strip_prefix("netty:tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("port is not a number"))?;
            EndpointScheme::NettyTcp {
                host: host.to_string(),
                port,
            }
        } else if let Some(name) = base.strip_prefix("direct:") {
            if name.is_empty() {
                return Err(invalid("empty direct name"));
            }
            EndpointScheme::Direct {
                name: name.to_string(),
            }
        } else if let Some(topic) = base.strip_prefix("kafka:") {
            if topic.is_empty() {
                return Err(invalid("empty topic"));
            }
            EndpointScheme::Kafka {
                topic: topic.to_string(),
            }
        } else {
            return Err(invalid("unknown scheme"));
        };

        let mut params = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => params.insert(key.to_string(), value.to_string()),
                None => params.insert(pair.to_string(), String::new()),
            };
        }

        Ok(Self { scheme, params })
    }

    /// Fill in parameters that are not already present. Existing values
    /// (from the URI itself or an earlier merge) always win.
    pub fn with_params(mut self, extra: &BTreeMap<String, String>) -> Self {
        for (key, value) in extra {
            self.params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Append the Netty send defaults, for Netty endpoints only.
    pub fn with_netty_defaults(mut self) -> Self {
        if matches!(self.scheme, EndpointScheme::NettyTcp { .. }) {
            for (key, value) in NETTY_SEND_DEFAULTS {
                self.params
                    .entry((*key).to_string())
                    .or_insert_with(|| (*value).to_string());
            }
        }
        self
    }

    /// The scheme-qualified base without parameters.
    pub fn base(&self) -> String {
        match &self.scheme {
            EndpointScheme::NettyTcp { host, port } => format!("netty:tcp://{host}:{port}"),
            EndpointScheme::Direct { name } => format!("direct:{name}"),
            EndpointScheme::Kafka { topic } => format!("kafka:{topic}"),
        }
    }

    /// Full URI string with query parameters in deterministic order.
    pub fn to_uri_string(&self) -> String {
        if self.params.is_empty() {
            return self.base();
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!("{}?{}", self.base(), query.join("&"))
    }

    /// A filesystem/topic-safe identity used in derived dead-letter
    /// topic names.
    pub fn endpoint_slug(&self) -> String {
        let base = match &self.scheme {
            EndpointScheme::NettyTcp { host, port } => format!("{host}-{port}"),
            EndpointScheme::Direct { name } => format!("direct-{name}"),
            EndpointScheme::Kafka { topic } => format!("kafka-{topic}"),
        };
        base.to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.param(key).and_then(|v| v.parse().ok())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.param(key).and_then(|v| v.parse().ok())
    }
}

impl std::fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
