//! Seedgate CLI - gateway entry point.
//!
//! Parses arguments, wires the production pipeline, and serves the gateway
//! until the process receives SIGINT or SIGTERM. Shutdown drains in-flight
//! requests, then closes every seed's pipeline, stopping the workers.

mod error;

use clap::Parser;
use error::CliError;
use seedgate::config::GatewayConfig;
use seedgate::registry::SeedRegistry;
use seedgate::{logging, server};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "seedgate")]
#[command(version = seedgate::VERSION)]
#[command(about = "HTTP gateway for seeded compute workers", long_about = None)]
struct Cli {
    /// Port the gateway listens on for user requests
    #[arg(long, default_value_t = seedgate::config::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init_logging().map_err(CliError::LoggingInit)?;

    let config = GatewayConfig::default().with_port(cli.port);
    let registry = Arc::new(SeedRegistry::with_default_pipeline(config.clone()));

    info!(version = seedgate::VERSION, "server has been started");
    server::serve(Arc::clone(&registry), config.port, shutdown_signal())
        .await
        .map_err(CliError::Serve)?;

    if let Err(err) = registry.close().await {
        error!(error = %err, "cannot close seed registry");
    }

    info!("see you soon");
    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("cannot install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("cannot install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
