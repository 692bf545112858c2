// src/sinks.rs
//! Outward push interfaces. The core calls these and ignores what happens
//! next; none of them return anything of consequence.

use crate::correlation::Signal;
use crate::fallback::LadderSource;
use crate::ingest::CategoryStatus;
use crate::model::{Domain, GeoPoint, LayerData, NewsItem};

/// Whether a news push is an intermediate batch or the category's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsUpdate {
    Partial,
    Final(CategoryStatus),
}

pub trait RenderSink: Send + Sync {
    fn set_news(&self, category: &str, items: &[NewsItem], update: NewsUpdate);
    /// `ready` marks the layer as populated, whatever its source.
    fn set_layer(&self, domain: Domain, data: &LayerData, source: LadderSource, ready: bool);
    /// The domain has no data and no fallback to show.
    fn show_unavailable(&self, domain: Domain, reason: &str);
    fn highlight(&self, at: GeoPoint, label: &str);
    fn show_error(&self, scope: &str, message: &str);
}

/// Freshness/telemetry contract, called once per settled task.
pub trait FreshnessSink: Send + Sync {
    fn record_update(&self, source_id: &str, count: usize);
    fn record_error(&self, source_id: &str, message: &str);
}

/// Receives each emitted signal exactly once.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signals: &[Signal]);
}

/// Sink that writes everything to the log; used by the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RenderSink for TracingSink {
    fn set_news(&self, category: &str, items: &[NewsItem], update: NewsUpdate) {
        match update {
            NewsUpdate::Partial => {
                tracing::debug!(target: "render", category, items = items.len(), "news batch")
            }
            NewsUpdate::Final(status) => {
                tracing::info!(target: "render", category, items = items.len(), status = status.as_str(), "news final")
            }
        }
    }

    fn set_layer(&self, domain: Domain, data: &LayerData, source: LadderSource, ready: bool) {
        tracing::info!(target: "render", %domain, items = data.len(), source = source.as_str(), ready, "layer set");
    }

    fn show_unavailable(&self, domain: Domain, reason: &str) {
        tracing::warn!(target: "render", %domain, reason, "layer unavailable");
    }

    fn highlight(&self, at: GeoPoint, label: &str) {
        tracing::info!(target: "render", lat = at.lat, lon = at.lon, label, "highlight");
    }

    fn show_error(&self, scope: &str, message: &str) {
        tracing::warn!(target: "render", scope, message, "error shown");
    }
}

impl SignalSink for TracingSink {
    fn emit(&self, signals: &[Signal]) {
        for s in signals {
            tracing::info!(
                target: "render",
                id = %s.id,
                kind = s.kind.as_str(),
                severity = ?s.severity,
                refs = s.source_refs.len(),
                "{}",
                s.title
            );
        }
    }
}
