use thiserror::Error;

/// Errors from broker interaction.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("produce failed: {0}")]
    Produce(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    /// Topic creation without the privilege for it; logged, never fatal.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid broker URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}
