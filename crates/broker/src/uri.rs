//! `kafka:<topic>?<params>` URI parsing.

use std::collections::BTreeMap;

use crate::error::BrokerError;

/// A broker topic URI with its parameters (serializer names, timeouts,
/// consumer settings) as plain string key/values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUri {
    pub topic: String,
    pub params: BTreeMap<String, String>,
}

impl BrokerUri {
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix("kafka:")
            .ok_or_else(|| invalid("expected 'kafka:' scheme"))?;
        let (topic, query) = match rest.split_once('?') {
            Some((topic, query)) => (topic, query),
            None => (rest, ""),
        };
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }

        let mut params = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => params.insert(key.to_string(), value.to_string()),
                None => params.insert(pair.to_string(), String::new()),
            };
        }

        Ok(Self {
            topic: topic.to_string(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn to_uri_string(&self) -> String {
        if self.params.is_empty() {
            return format!("kafka:{}", self.topic);
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!("kafka:{}?{}", self.topic, query.join("&"))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
