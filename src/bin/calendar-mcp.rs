//! Calendar MCP server
//!
//! Serves the calendar tools over stdio (the default) or HTTP. See
//! `calendar-mcp --help` for the environment variables each flag reads.

use clap::Parser;

use calendar_mcp::config::ServerConfig;
use calendar_mcp::tenancy::TenancyEnforcer;
use calendar_mcp::tools::calendar_router;
use calendar_mcp::transport::TransportAdapter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    // stdout belongs to the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(
            config.log_directives(std::env::var("RUST_LOG").ok()),
        )?)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    tracing::info!(
        transport = ?config.transport,
        identity = ?config.identity_mode(),
        resource = %config.resource_url(),
        "Starting calendar-mcp server"
    );

    let enforcer = TenancyEnforcer::new(config.calendar_store()?);
    let router = calendar_router(enforcer, &config.metadata())?;

    let adapter = TransportAdapter::from_config(&config)?;
    tokio::select! {
        result = adapter.serve(router) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }

    Ok(())
}
