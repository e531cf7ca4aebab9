//! Signalwatch Worker
//!
//! Runs the opposite-signal monitor on its cron schedule.
//! Can be run as a separate process from the API server.

use dotenvy::dotenv;
use signalwatch::config::Config;
use signalwatch::core::runtime::AppRuntime;
use signalwatch::logging;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();

    let config = Config::from_env()?;
    info!("Starting Signalwatch Worker");
    info!(environment = %config.environment, "Environment");
    info!(
        interval = config.monitor.interval_minutes,
        timeframe = %config.monitor.timeframe,
        "Opposite-signal check: every {} minutes",
        config.monitor.interval_minutes
    );

    let runtime = AppRuntime::init(config)
        .await
        .map_err(|e| format!("Failed to initialize runtime: {}", e))?;

    runtime.scheduler.start().await;

    info!("Worker started, waiting for shutdown signal...");
    signal::ctrl_c().await?;
    info!("Shutting down worker...");
    runtime.scheduler.stop().await;
    info!("Worker stopped");

    Ok(())
}
