use thiserror::Error;

/// Errors from endpoint parsing and delivery.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// In-process channel failures are permanent: nobody is listening.
    #[error("channel '{0}' unavailable: receiver dropped or full")]
    ChannelUnavailable(String),

    #[error("invalid endpoint URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported scheme for this transport: {0}")]
    UnsupportedScheme(String),
}

impl EndpointError {
    /// Structural side of the network classification: connection
    /// failures, timeouts and raw I/O errors are transient.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            EndpointError::Connection(_) | EndpointError::Timeout(_) | EndpointError::Io(_)
        )
    }
}

/// The tokens whose presence in an error message marks it transient.
const NETWORK_TOKENS: &[&str] = &[
    "connection",
    "timeout",
    "network",
    "socket",
    "io",
    "connect",
    "refused",
];

/// Message-based side of the network classification, applied to errors
/// from layers that do not expose a structured kind.
pub fn message_indicates_network(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_TOKENS.iter().any(|token| lower.contains(token))
}

// ── Tests ───────────────────────────────────────────────────────────
