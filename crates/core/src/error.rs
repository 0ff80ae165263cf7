use thiserror::Error;

/// Errors from envelope decoding and FIX payload handling.
#[derive(Debug, Error)]
pub enum FixError {
    #[error("envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope text form error: {0}")]
    TextForm(String),

    #[error("invalid FIX payload: {0}")]
    InvalidPayload(String),
}
