//! Situation ingest: binary entrypoint.
//! Loads the ingest config, runs one load cycle against the configured feeds
//! and domains, and logs the outcome of every task.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use situation_ingest::sinks::TracingSink;
use situation_ingest::telemetry::{install_prometheus, MetricsFreshness};
use situation_ingest::{Driver, IngestConfig};

/// Compact logs by default; `INGEST_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("situation_ingest=info,warn"));
    let json = std::env::var("INGEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Ok(addr) = std::env::var("INGEST_METRICS_ADDR") {
        let addr: SocketAddr = addr.trim().parse()?;
        install_prometheus(addr)?;
    }

    let config = IngestConfig::load_default()?;
    tracing::info!(
        variant = ?config.variant,
        layers = config.scheduled_domains().len(),
        categories = config.news.categories.len(),
        "config loaded"
    );

    let sink = Arc::new(TracingSink);
    let freshness = Arc::new(MetricsFreshness::new());
    let driver = Driver::from_config(config, sink.clone(), freshness.clone(), sink)?;

    let report = driver.load_all().await;
    for task in &report.tasks {
        tracing::info!(
            task = %task.name,
            outcome = task.outcome.label(),
            source = task.source.map(|s| s.as_str()).unwrap_or("-"),
            items = task.items,
            "task settled"
        );
    }
    tracing::info!(
        signals = report.signals.len(),
        elapsed_ms = report.duration.as_millis() as u64,
        "cycle done"
    );
    driver.destroy();
    Ok(())
}
