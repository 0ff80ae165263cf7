//! In-process `direct:<name>` endpoints.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::EndpointError;
use crate::sender::EndpointSender;

/// Registry of named in-process channels.
///
/// A consumer registers a name and holds the receiving end; dispatches to
/// `direct:<name>` resolve a sender against the registry at send time.
#[derive(Debug, Clone, Default)]
pub struct DirectRegistry {
    inner: Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>,
}

impl DirectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named channel; returns the receiving end.
    pub fn register(&self, name: &str, capacity: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(capacity);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), tx);
        info!(name, "direct endpoint registered");
        rx
    }

    /// Resolve a sender for a registered name.
    pub fn sender(&self, name: &str) -> Option<DirectSender> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|tx| DirectSender {
                name: name.to_string(),
                tx: tx.clone(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Send side of one registered direct channel.
#[derive(Debug, Clone)]
pub struct DirectSender {
    name: String,
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl EndpointSender for DirectSender {
    async fn send(&self, payload: &str) -> Result<(), EndpointError> {
        self.tx
            .send(payload.to_string())
            .await
            .map_err(|_| EndpointError::ChannelUnavailable(self.name.clone()))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
