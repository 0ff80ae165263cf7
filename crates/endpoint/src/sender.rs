use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EndpointError;

/// Delivers one raw FIX payload to a downstream endpoint.
///
/// Sends are synchronous from the caller's point of view: the future
/// resolves once the payload is on the wire (or the in-process channel),
/// which is what the per-envelope ordering contract relies on.
#[async_trait]
pub trait EndpointSender: Send + Sync {
    async fn send(&self, payload: &str) -> Result<(), EndpointError>;
}

/// Blanket implementation so `Arc<dyn EndpointSender>` can be used directly.
#[async_trait]
impl<T: EndpointSender + ?Sized> EndpointSender for Arc<T> {
    async fn send(&self, payload: &str) -> Result<(), EndpointError> {
        (**self).send(payload).await
    }
}
