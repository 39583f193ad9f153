//! ProvisionFlow
//!
//! Maintenance process: opens the configured store, runs retention cleanup
//! on a timer and exits on Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ProvisionFlow::{
    config::Settings,
    handlers::HandlerRegistry,
    services::SessionManager,
    state::open_store,
    utils::logging,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let settings = Settings::new().context("failed to load settings")?;
    settings.validate()?;

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = logging::init_logging(&settings.logging)?;

    info!("Starting {}...", ProvisionFlow::info());

    info!(backend = %settings.storage.backend, path = %settings.storage.path, "Opening session store...");
    let store = open_store(&settings.storage)
        .await
        .context("failed to open session store")?;

    let manager = Arc::new(
        SessionManager::builder()
            .store(store)
            .cache_capacity(settings.cache.capacity)
            .handlers(HandlerRegistry::builtin()?)
            .build()?,
    );

    let stats = manager.stats().await?;
    info!(
        total = stats.total_sessions,
        by_status = ?stats.by_status,
        backend = stats.backend,
        "Session store ready"
    );

    manager.start_retention(&settings.retention);

    info!("ProvisionFlow is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    manager.shutdown();

    info!("ProvisionFlow has been shut down.");
    Ok(())
}
