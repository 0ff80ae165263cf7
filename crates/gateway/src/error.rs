use thiserror::Error;

/// Gateway-level errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Broker(#[from] fixgate_broker::BrokerError),

    #[error(transparent)]
    Endpoint(#[from] fixgate_endpoint::EndpointError),

    #[error(transparent)]
    Routing(#[from] fixgate_routing::RoutingError),

    #[error(transparent)]
    Fix(#[from] fixgate_core::FixError),

    #[error(transparent)]
    Expr(#[from] fixgate_expr::ExprError),

    #[error("gateway config error: {0}")]
    Config(String),

    #[error("gateway config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("gateway config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Startup failures that must take the process down with exit code 1.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// A destination with `stopOnException` failed terminally; the
    /// remaining destinations were not attempted.
    #[error("dispatch stopped by destination '{0}'")]
    StopOnException(String),

    /// Shutdown observed mid-dispatch; the record must not be committed.
    #[error("interrupted by shutdown")]
    Interrupted,
}
