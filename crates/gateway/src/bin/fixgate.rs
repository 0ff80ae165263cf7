//! fixgate — FIX message gateway between a log-based broker and
//! line-oriented FIX endpoints.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: fixgate.toml if present, routing config per priority chain
//! fixgate
//!
//! # Explicit paths
//! fixgate --config conf/fixgate.toml --routing-config conf/routes.json
//! ```
//!
//! Exit codes: 0 on clean shutdown, 1 on startup failure.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use fixgate_broker::{BrokerClient, MemoryBroker};
use fixgate_endpoint::DirectRegistry;
use fixgate_expr::ExprCache;
use fixgate_gateway::supervisor::{self, Supervisor};
use fixgate_gateway::GatewayConfig;

/// FIX message gateway: consumes broker topics into FIX endpoints and
/// wraps inbound FIX traffic back onto the broker.
#[derive(Parser, Debug)]
#[command(name = "fixgate", version, about)]
struct Cli {
    /// Path to the gateway settings file (default: ./fixgate.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the routing configuration document; highest priority in
    /// the resolution chain.
    #[arg(long)]
    routing_config: Option<PathBuf>,

    /// Override the introspection API port.
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.http_port {
        config.http.port = port;
    }

    let cache = Arc::new(ExprCache::new());
    let table = Arc::new(fixgate_routing::load(
        cli.routing_config.as_deref(),
        config.routing_config_path.as_deref(),
        &cache,
    )?);

    let broker: Arc<dyn BrokerClient> = match config.broker.mode.as_str() {
        "memory" => Arc::new(MemoryBroker::new()),
        other => anyhow::bail!("unsupported broker mode '{other}'"),
    };
    let directs = DirectRegistry::new();

    let running = match Supervisor::start(&config, table, broker, directs, cache).await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!(error = %e, "gateway startup failed");
            std::process::exit(1);
        }
    };

    supervisor::wait_for_shutdown_signal().await;
    running.stop().await;
    Ok(())
}
