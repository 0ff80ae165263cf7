use thiserror::Error;

/// Errors raised while loading or validating the routing configuration.
/// All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("routing config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid routing config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Uri(#[from] fixgate_endpoint::EndpointError),
}
