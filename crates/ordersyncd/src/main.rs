//! ordersyncd - order sync daemon
//!
//! Pulls orders from the remote API into the local store on demand and
//! on a schedule, and serves the control API.

use anyhow::{Context, Result};
use ordersyncd::{api, DaemonConfig};
use std::sync::Arc;
use sync_core::{
    health::HealthRegistry,
    HttpRecordSource, SqliteRecordStore, StructuredLogger, SyncOrchestrator, SyncScheduler,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ordersyncd");

    let config = DaemonConfig::load()?;
    info!(
        instance = %config.instance,
        source = %config.source.base_url,
        database = %config.database.url,
        "Daemon configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all();

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(DAEMON_VERSION);

    let source = HttpRecordSource::new(config.source_config()).context("Failed to build source")?;
    let store = SqliteRecordStore::connect(config.store_config())
        .await
        .context("Failed to open store")?;

    let orchestrator = Arc::new(
        SyncOrchestrator::builder(config.sync.clone(), Arc::new(source), Arc::new(store))
            .health(health_registry.clone())
            .instance(config.instance.clone())
            .build()?,
    );
    let scheduler = Arc::new(
        SyncScheduler::new(Arc::clone(&orchestrator), &config.sync)?
            .with_health(health_registry.clone()),
    );

    if config.sync.scheduled_sync_enabled {
        let status = scheduler.start_scheduled_sync(None)?;
        info!(
            interval_secs = ?status.interval_secs,
            cron = ?status.cron,
            next_run_at = ?status.next_run_at,
            "Scheduled sync enabled"
        );
    }

    let app_state = Arc::new(api::AppState::new(
        Arc::clone(&orchestrator),
        Arc::clone(&scheduler),
        health_registry.clone(),
    ));

    // Mark daemon as ready after initialization
    health_registry.set_ready(true);

    api::serve(&config.listen_addr, app_state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false);
    scheduler.stop();
    info!("Shutting down");

    Ok(())
}
