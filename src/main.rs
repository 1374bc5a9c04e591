use anyhow::{Context, Result};
use rep_tracker::api::{routes::create_routes, AppState};
use rep_tracker::config::AppConfig;
use rep_tracker::services::{CleanupJob, DetectionService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let detection = Arc::new(
        DetectionService::from_config(&config)
            .await
            .context("Failed to initialize detection pipeline")?,
    );

    let cleanup = CleanupJob::start(Arc::clone(detection.sessions()), &config.cleanup_schedule)
        .await
        .context("Failed to schedule session cleanup")?;

    // Create the application routes
    let app = create_routes(AppState::new(detection, config.quality_gate));

    // Start the server
    let address = config.server_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Rep tracker starting on http://{}", address);
    info!("Health check available at http://{}/health", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cleanup.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
