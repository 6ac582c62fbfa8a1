use anyhow::Context as _;
use burrow_app::{telemetry, AppError, Application, Cli};
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.log_format)?;

    let settings = cli.settings();
    info!(
        backend = %settings.backend,
        flush_interval = ?settings.deletion.flush_interval,
        fetch_failure = %cli.delete_fetch_failure,
        "starting burrow"
    );

    let app = Application::start(settings)
        .await
        .context("failed to start application")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    match app.shutdown_within(cli.shutdown_timeout()).await {
        Err(AppError::ShutdownTimedOut(timeout)) => {
            warn!(?timeout, "deletion pipeline abandoned at shutdown")
        }
        result => result.context("failed to stop application")?,
    }

    Ok(())
}
