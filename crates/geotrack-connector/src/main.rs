//! # Geotrack Simulator
//!
//! Binary entry point: loads a scenario, runs it until Ctrl+C or SIGTERM.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geotrack_connector::{EnvConfig, Orchestrator, ScenarioConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "geotrack")]
#[command(about = "Simulate vehicles driving along routed trips")]
struct Args {
    /// Scenario file (defaults to GEOTRACK_CONFIG_PATH or ./data/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Dry run (load and build the scenario, don't start it)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = EnvConfig::from_env();
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }

    tracing::info!(
        version = geotrack_connector::VERSION,
        "Starting geotrack simulator"
    );

    let path = args.config.unwrap_or_else(|| config.config_path.clone());
    tracing::info!(path = %path.display(), "Loading scenario");
    let scenario = ScenarioConfig::load(&path)?;

    let orchestrator = Orchestrator::from_config(&scenario, &config)?;
    tracing::info!(
        connectors = orchestrator.connectors().len(),
        vehicles = orchestrator.vehicles().count(),
        "Scenario built"
    );

    if args.dry_run {
        tracing::info!("Dry run, not starting");
        return Ok(());
    }

    orchestrator.start().await;
    shutdown_signal().await;
    orchestrator.shutdown().await;

    tracing::info!("Shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
