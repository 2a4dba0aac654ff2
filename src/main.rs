// Main entry point - Dependency injection and a one-shot collection run
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use trend_collector::application::collector::Collector;
use trend_collector::domain::calendar::DAY_SECS;
use trend_collector::infrastructure::arithmetic_formula::ArithmeticFormula;
use trend_collector::infrastructure::config::load_collector_config;
use trend_collector::infrastructure::memory_repository::{InMemoryRepository, SeedData};
use trend_collector::presentation::summary::render_report;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_collector_config().context("Failed to load collector config")?;
    let seed = SeedData::load(&config.seed.path).await?;

    // Infrastructure
    let repository = Arc::new(InMemoryRepository::from_seed(seed).await);
    let formulas = Arc::new(ArithmeticFormula);

    // Application
    let collector = Collector::new(repository, formulas, config.collector.clone());
    collector
        .sync_metadata(config.collector.disable_new_by_default)
        .await;
    for series in collector.all_series().await {
        collector.set_enabled(series.id(), true).await;
    }

    let end = Utc::now().timestamp();
    let start = end - config.collector.display_days * DAY_SECS;
    collector.gather(start, end).await;

    for series in collector.all_series().await {
        collector.update_trend(series.id()).await;
    }

    // Presentation
    println!("{}", render_report(&collector.all_series().await)?);
    Ok(())
}
