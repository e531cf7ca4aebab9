//! Signalwatch API Server
//!
//! HTTP API over the repository and the monitor, with health and metrics.
//! Set `RUN_SCHEDULER=true` to also run the monitor schedule in-process.

use dotenvy::dotenv;
use signalwatch::config::Config;
use signalwatch::core::http::{start_server, AppState};
use signalwatch::core::runtime::AppRuntime;
use signalwatch::logging;
use std::env;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();

    let config = Config::from_env()?;
    let port = config.port;
    info!("Starting Signalwatch API Server");
    info!(environment = %config.environment, "Environment");
    info!(port = port, "HTTP Server: http://0.0.0.0:{}", port);

    let run_scheduler = env::var("RUN_SCHEDULER")
        .map(|v| matches!(v.as_str(), "1" | "true"))
        .unwrap_or(false);

    let runtime = AppRuntime::init(config)
        .await
        .map_err(|e| format!("Failed to initialize runtime: {}", e))?;
    if run_scheduler {
        runtime.scheduler.start().await;
    }

    let state = AppState::from_runtime(&runtime);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state, port).await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("API server started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down API server...");
            runtime.scheduler.stop().await;
            info!("API server stopped");
        }
        _ = server_handle => {
            error!("HTTP server stopped");
        }
    }

    Ok(())
}
