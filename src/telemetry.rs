// src/telemetry.rs
//! Metric descriptions and the metrics-backed freshness sink.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::sinks::FreshnessSink;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_tasks_total", "Guarded task runs by outcome.");
        describe_counter!("ingest_feed_errors_total", "Per-feed fetch failures by kind.");
        describe_counter!("ingest_source_errors_total", "Failed task outcomes per source.");
        describe_counter!("ingest_items_total", "News items delivered per category.");
        describe_counter!("fallback_rung_total", "Fallback ladder steps by domain, rung and outcome.");
        describe_counter!("generative_calls_total", "Calls made to generative providers.");
        describe_counter!("signals_emitted_total", "Correlation signals emitted by kind.");
        describe_histogram!("ingest_cycle_duration_ms", "Wall time of a full load cycle in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("domain_last_update_ts", "Unix ts of the last successful update per source.");
    });
}

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
/// Must be called from inside a Tokio runtime.
pub fn install_prometheus(listen: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
    ensure_metrics_described();
    tracing::info!(%listen, "prometheus exporter listening");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Freshness {
    pub last_update: Option<DateTime<Utc>>,
    pub last_count: usize,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub errors: u64,
}

/// Freshness sink that mirrors every record into `metrics` and keeps a
/// per-source table for status pages.
#[derive(Debug, Default)]
pub struct MetricsFreshness {
    table: Mutex<BTreeMap<String, Freshness>>,
}

impl MetricsFreshness {
    pub fn new() -> Self {
        ensure_metrics_described();
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Freshness> {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn get(&self, source_id: &str) -> Option<Freshness> {
        self.table
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(source_id)
            .cloned()
    }
}

impl FreshnessSink for MetricsFreshness {
    fn record_update(&self, source_id: &str, count: usize) {
        let now = Utc::now();
        gauge!("domain_last_update_ts", "source" => source_id.to_string()).set(now.timestamp() as f64);
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        let entry = table.entry(source_id.to_string()).or_default();
        entry.last_update = Some(now);
        entry.last_count = count;
    }

    fn record_error(&self, source_id: &str, message: &str) {
        counter!("ingest_source_errors_total", "source" => source_id.to_string()).increment(1);
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        let entry = table.entry(source_id.to_string()).or_default();
        entry.last_error = Some(message.to_string());
        entry.last_error_at = Some(Utc::now());
        entry.errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_error_are_tracked_separately() {
        let f = MetricsFreshness::new();
        f.record_update("weather", 8);
        f.record_error("weather", "timed out");
        f.record_error("markets", "rate limited");

        let w = f.get("weather").unwrap();
        assert_eq!(w.last_count, 8);
        assert!(w.last_update.is_some());
        assert_eq!(w.errors, 1);
        assert_eq!(w.last_error.as_deref(), Some("timed out"));

        let snap = f.snapshot();
        assert_eq!(snap.keys().cloned().collect::<Vec<_>>(), vec!["markets", "weather"]);
        assert!(snap["markets"].last_update.is_none());
    }
}
