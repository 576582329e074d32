use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use price_watch::config::Settings;
use price_watch::database::Database;
use price_watch::extractor::PageExtractor;
use price_watch::lock::PgLockManager;
use price_watch::notifier::EmailNotifier;
use price_watch::PriceEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting price watch");

    let database = Database::connect(&settings.database_url, settings.max_connections).await?;
    let locks = Arc::new(PgLockManager::new(database.pool().clone()));
    let extractor = PageExtractor::new(settings.extractor.clone())?;
    let notifier = EmailNotifier::new(settings.smtp.clone())?;
    if notifier.is_enabled() {
        info!("Email alerts enabled");
    }

    let engine = PriceEngine::new(
        Arc::new(database),
        Arc::new(extractor),
        Arc::new(notifier),
        locks,
    );
    let scheduler = engine.scheduler(&settings.schedule);

    if settings.run_on_start {
        info!("Running all jobs once before the schedule starts");
        scheduler.run_all_now().await;
    }

    scheduler.start().await?;
    info!(
        "Scheduler started - refresh every {}s, notify every {}s, reset every {}s",
        settings.schedule.refresh_interval.as_secs(),
        settings.schedule.notify_interval.as_secs(),
        settings.schedule.reset_interval.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.shutdown().await?;

    Ok(())
}
