use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feewatch::config::Config;
use feewatch::service::FeeService;

/// Backoff between supervisor restarts after a pipeline failure.
const RESTART_BACKOFF: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "feewatch")]
#[command(about = "Streaming mempool fee estimation", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "feewatch.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    info!("starting feewatch");
    let config = Config::from_file(&cli.config)?;

    tokio::select! {
        result = supervise(config) => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

/// Restarts the pipeline after transport or subscription failures. Parse
/// and arithmetic errors never reach this level.
async fn supervise(config: Config) -> Result<()> {
    loop {
        match FeeService::connect(config.clone()).await {
            Ok(service) => {
                if let Err(e) = service.run().await {
                    error!("pipeline failed: {:#}", e);
                }
            }
            Err(e) => error!("pipeline startup failed: {:#}", e),
        }
        info!(
            backoff_secs = RESTART_BACKOFF.as_secs(),
            "restarting pipeline"
        );
        tokio::time::sleep(RESTART_BACKOFF).await;
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let filter = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler")
}
