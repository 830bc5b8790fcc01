use dotenvy::dotenv;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::modules::jobs::service::JobService;
use crate::state::AppState;
use crate::workers::reaper::{reap_once, spawn_reaper};
use crate::workers::transcoder::spawn_workers;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new()?;
    let port = config.server_port;
    let state = AppState::from_config(config).await?;

    JobService::recover(state.clone()).await?;
    match reap_once(&state, OffsetDateTime::now_utc()).await {
        Ok(report) => info!(
            requeued = report.requeued,
            failed = report.failed,
            redelivered = report.redelivered,
            "Startup reaper pass finished"
        ),
        Err(e) => warn!("Startup reaper pass failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(state.clone(), shutdown.clone());
    let reaper = spawn_reaper(state.clone(), shutdown.clone());

    let app = app::create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    state.queue.close();
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker task ended abnormally: {}", e);
        }
    }
    if let Err(e) = reaper.await {
        error!("Reaper task ended abnormally: {}", e);
    }

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
