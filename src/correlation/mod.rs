// src/correlation/mod.rs
//! Correlation & anomaly engine.
//!
//! One pass takes the cycle's news counts and live layers, feeds the
//! baseline store, and turns deviations, regional military activity and
//! spatial co-occurrence into [`Signal`]s. Learning mode computes everything
//! but emits nothing. Each signal id is emitted at most once per cooldown.

pub mod geo;
pub mod military;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::baseline::{BaselineStore, Deviation, DeviationLevel};
use crate::model::{Domain, GeoPoint, LayerData, MilitaryTrack, NewsItem};
use geo::{ConvergenceDetector, ConvergenceParams};
use military::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Surge,
    ForeignPresence,
    GeoConvergence,
    TemporalAnomaly,
    KeywordSpike,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Surge => "surge",
            SignalKind::ForeignPresence => "foreign_presence",
            SignalKind::GeoConvergence => "geo_convergence",
            SignalKind::TemporalAnomaly => "temporal_anomaly",
            SignalKind::KeywordSpike => "keyword_spike",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A derived cross-source event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    /// Hash of kind and detection key; equal detections share an id.
    pub id: String,
    pub kind: SignalKind,
    pub severity: Severity,
    pub title: String,
    pub source_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

impl Signal {
    pub fn new(kind: SignalKind, key: &str, severity: Severity, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id: short_hash(&format!("{}|{}", kind.as_str(), key)),
            kind,
            severity,
            title,
            source_refs: Vec::new(),
            created_at: now,
            location: None,
        }
    }

    pub fn with_refs(mut self, refs: impl IntoIterator<Item = String>) -> Self {
        self.source_refs = refs.into_iter().collect();
        self
    }

    pub fn with_location(mut self, at: GeoPoint) -> Self {
        self.location = Some(at);
        self
    }
}

/// Hex prefix of the SHA-256 of `text`.
pub(crate) fn short_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(24);
    for b in digest.iter().take(12) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Shared learning-mode switch. Toggled by the embedding application.
#[derive(Debug, Clone, Default)]
pub struct LearningMode(Arc<AtomicBool>);

impl LearningMode {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Optional post-processing of a pass's signals. A failing enrichment is
/// logged and skipped; the signals it was given pass through unchanged.
#[async_trait]
pub trait Enrichment: Send + Sync {
    fn name(&self) -> &str;
    async fn enrich(&self, signals: &[Signal], input: &CorrelationInput) -> anyhow::Result<Vec<Signal>>;
}

/// Everything one correlation pass looks at.
#[derive(Debug, Clone, Default)]
pub struct CorrelationInput {
    /// Items per news category; categories absent this cycle are omitted.
    pub news: Vec<(String, Vec<NewsItem>)>,
    /// Live-sourced layers only.
    pub layers: Vec<(Domain, LayerData)>,
}

impl CorrelationInput {
    fn has_tracks(&self) -> bool {
        self.layers
            .iter()
            .any(|(d, _)| matches!(d, Domain::MilitaryFlights | Domain::Vessels))
    }

    fn tracks(&self) -> Vec<MilitaryTrack> {
        self.layers
            .iter()
            .filter(|(d, _)| matches!(d, Domain::MilitaryFlights | Domain::Vessels))
            .flat_map(|(_, l)| l.tracks().iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSettings {
    pub convergence: ConvergenceParams,
    pub regions: Vec<Region>,
    pub keywords: Vec<String>,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            convergence: ConvergenceParams::default(),
            regions: military::default_regions(),
            keywords: Vec::new(),
        }
    }
}

pub struct CorrelationEngine {
    baseline: Arc<BaselineStore>,
    learning: LearningMode,
    settings: CorrelationSettings,
    convergence: Mutex<ConvergenceDetector>,
    ledger: Mutex<HashMap<String, DateTime<Utc>>>,
    enrichments: Vec<Arc<dyn Enrichment>>,
}

impl CorrelationEngine {
    pub fn new(baseline: Arc<BaselineStore>, learning: LearningMode, settings: CorrelationSettings) -> Self {
        Self {
            baseline,
            learning,
            convergence: Mutex::new(ConvergenceDetector::new(settings.convergence)),
            settings,
            ledger: Mutex::new(HashMap::new()),
            enrichments: Vec::new(),
        }
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn Enrichment>) -> Self {
        self.enrichments.push(enrichment);
        self
    }

    pub fn baseline(&self) -> &Arc<BaselineStore> {
        &self.baseline
    }

    pub fn learning(&self) -> &LearningMode {
        &self.learning
    }

    /// Run one pass and return the signals to emit (empty in learning mode).
    pub async fn run_pass(&self, input: &CorrelationInput, now: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();
        signals.extend(self.temporal_anomalies(input, now));
        signals.extend(self.keyword_spikes(input, now));

        // No live track layer this cycle: leave the regional baselines alone.
        if input.has_tracks() {
            let tracks = input.tracks();
            signals.extend(military::detect_surges(&self.baseline, &self.settings.regions, &tracks, now));
            signals.extend(military::detect_foreign_presence(&self.settings.regions, &tracks, now));
        }
        signals.extend(self.convergence_signals(input, now));

        for enrichment in &self.enrichments {
            match enrichment.enrich(&signals, input).await {
                Ok(enriched) => signals = enriched,
                Err(e) => tracing::warn!(
                    target: "correlation",
                    enrichment = enrichment.name(),
                    error = %format!("{e:#}"),
                    "enrichment failed, omitted this cycle"
                ),
            }
        }

        if self.learning.is_active() {
            tracing::debug!(target: "correlation", suppressed = signals.len(), "learning mode, no signals emitted");
            return Vec::new();
        }

        let fresh = self.admit(signals, now);
        for s in &fresh {
            counter!("signals_emitted_total", "kind" => s.kind.as_str()).increment(1);
        }
        if !fresh.is_empty() {
            tracing::info!(target: "correlation", emitted = fresh.len(), "signals emitted");
        }
        fresh
    }

    /// Drop signals whose id was emitted within the cooldown; remember the
    /// rest. Duplicates inside one pass collapse to the first.
    fn admit(&self, signals: Vec<Signal>, now: DateTime<Utc>) -> Vec<Signal> {
        let cooldown = self.settings.convergence.window();
        let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
        ledger.retain(|_, at| now.signed_duration_since(*at) < cooldown);
        signals
            .into_iter()
            .filter(|s| {
                if ledger.contains_key(&s.id) {
                    false
                } else {
                    ledger.insert(s.id.clone(), now);
                    true
                }
            })
            .collect()
    }

    fn temporal_anomalies(&self, input: &CorrelationInput, now: DateTime<Utc>) -> Vec<Signal> {
        let mut observations: Vec<(String, f64, Vec<String>)> = input
            .news
            .iter()
            .map(|(cat, items)| (format!("news:{cat}"), items.len() as f64, Vec::new()))
            .collect();

        for (domain, layer) in &input.layers {
            if let Some(metric) = domain.count_metric() {
                observations.push((metric.to_string(), layer.len() as f64, Vec::new()));
            }
            if *domain == Domain::Vessels {
                let gaps: Vec<String> = layer.tracks().iter().filter(|t| t.ais_gap).map(|t| t.id.clone()).collect();
                observations.push(("ais_gaps".to_string(), gaps.len() as f64, gaps));
            }
        }

        observations
            .into_iter()
            .filter_map(|(metric, count, refs)| {
                let dev = self.baseline.observe(&metric, count);
                anomaly_signal(SignalKind::TemporalAnomaly, &metric, count, &dev, DeviationLevel::Elevated, now)
                    .map(|s| s.with_refs(refs))
            })
            .collect()
    }

    fn keyword_spikes(&self, input: &CorrelationInput, now: DateTime<Utc>) -> Vec<Signal> {
        if self.settings.keywords.is_empty() || input.news.is_empty() {
            return Vec::new();
        }
        let titles: Vec<(String, &NewsItem)> = input
            .news
            .iter()
            .flat_map(|(_, items)| items.iter())
            .map(|i| (i.title.to_lowercase(), i))
            .collect();

        let mut out = Vec::new();
        for term in &self.settings.keywords {
            let needle = term.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            let hits: Vec<&NewsItem> = titles
                .iter()
                .filter(|(t, _)| t.contains(&needle))
                .map(|(_, i)| *i)
                .collect();
            let metric = format!("keyword:{needle}");
            let dev = self.baseline.observe(&metric, hits.len() as f64);
            let count = hits.len() as f64;
            if let Some(s) = anomaly_signal(SignalKind::KeywordSpike, &metric, count, &dev, DeviationLevel::High, now) {
                out.push(s.with_refs(hits.iter().map(|i| if i.link.is_empty() { i.title.clone() } else { i.link.clone() })));
            }
        }
        out
    }

    fn convergence_signals(&self, input: &CorrelationInput, now: DateTime<Utc>) -> Vec<Signal> {
        let mut det = self.convergence.lock().unwrap_or_else(|p| p.into_inner());
        for (domain, layer) in &input.layers {
            det.ingest(layer.geo_events(domain.as_str()));
        }
        for (cat, items) in &input.news {
            det.ingest(items.iter().filter_map(|i| {
                let at = i.location?;
                Some(crate::model::GeoEvent {
                    id: format!("news:{}", if i.link.is_empty() { &i.title } else { &i.link }),
                    lat: at.lat,
                    lon: at.lon,
                    kind: format!("news:{cat}"),
                    time: i.published_at,
                })
            }));
        }
        det.detect(now)
            .into_iter()
            .map(|c| {
                let severity = match c.source_types.len() {
                    0..=2 => Severity::Medium,
                    3 => Severity::High,
                    _ => Severity::Critical,
                };
                let types: Vec<&str> = c.source_types.iter().map(String::as_str).collect();
                let title = format!("{} events converge: {}", c.events.len(), types.join(" + "));
                Signal::new(SignalKind::GeoConvergence, &c.key, severity, title, now)
                    .with_refs(c.events.iter().map(|e| e.id.clone()))
                    .with_location(c.centroid)
            })
            .collect()
    }
}

fn anomaly_signal(
    kind: SignalKind,
    metric: &str,
    current: f64,
    dev: &Deviation,
    min_level: DeviationLevel,
    now: DateTime<Utc>,
) -> Option<Signal> {
    if dev.level < min_level {
        return None;
    }
    let severity = match dev.level {
        DeviationLevel::High => Severity::High,
        _ => Severity::Medium,
    };
    let title = format!(
        "{metric} at {:.0} vs mean {:.1} ({:+.0}%, z={:.1})",
        current,
        dev.mean,
        dev.percent_change,
        dev.z_score
    );
    Some(Signal::new(kind, &format!("{metric}:{:?}", dev.level), severity, title, now))
}
