// tests/correlation.rs
mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use situation_ingest::baseline::{BaselineParams, BaselineStore, DeviationLevel};
use situation_ingest::correlation::geo::{ConvergenceDetector, ConvergenceParams};
use situation_ingest::correlation::{
    CorrelationEngine, CorrelationInput, CorrelationSettings, LearningMode, SignalKind,
};
use situation_ingest::fallback::SourceFetcher;
use situation_ingest::model::{FetchOutcome, GeoEvent, GeoIncident, MilitaryTrack, TrackKind};
use situation_ingest::{Domain, Driver, LayerData, LiveFetchers};

/// Incidents near Istanbul, a different id per domain.
struct IstanbulIncidents;

#[async_trait]
impl SourceFetcher<GeoIncident> for IstanbulIncidents {
    fn name(&self) -> &str {
        "istanbul"
    }

    async fn fetch(&self, domain: Domain) -> anyhow::Result<FetchOutcome<GeoIncident>> {
        Ok(FetchOutcome::items(vec![GeoIncident {
            id: format!("{domain}-1"),
            title: format!("{domain} near Taksim"),
            lat: 41.037,
            lon: 28.985,
            country: Some("TR".into()),
            occurred_at: Utc::now() - ChronoDuration::minutes(20),
            magnitude: None,
        }]))
    }
}

fn event(id: &str, kind: &str, lat: f64, lon: f64, minutes_ago: i64) -> GeoEvent {
    GeoEvent {
        id: id.into(),
        lat,
        lon,
        kind: kind.into(),
        time: Utc::now() - ChronoDuration::minutes(minutes_ago),
    }
}

#[test]
fn baseline_spike_is_deterministic() {
    let a = BaselineStore::new(BaselineParams::default());
    let b = BaselineStore::new(BaselineParams::default());
    for c in [10.0, 12.0, 11.0, 40.0] {
        a.update_baseline("vessels", c);
        b.update_baseline("vessels", c);
    }
    let da = a.deviation_of_latest("vessels").unwrap();
    let db = b.deviation_of_latest("vessels").unwrap();
    assert_eq!(da, db);
    assert_eq!(da.level, DeviationLevel::High);
    assert!((da.mean - 11.0).abs() < 1e-9);
    assert!((da.z_score - 29.0 / (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
}

#[test]
fn seeded_histories_score_identically() {
    let mut rng = StdRng::seed_from_u64(42);
    let series: Vec<f64> = (0..60).map(|_| rng.random_range(5..15) as f64).collect();

    let score = |series: &[f64]| {
        let store = BaselineStore::new(BaselineParams::default());
        series
            .iter()
            .map(|c| store.observe("news:world", *c))
            .collect::<Vec<_>>()
    };
    let first = score(&series);
    assert_eq!(first, score(&series));
    // Window is bounded.
    let store = BaselineStore::new(BaselineParams::default());
    for c in &series {
        store.update_baseline("news:world", *c);
    }
    assert_eq!(store.history("news:world").len(), 48);
}

#[test]
fn convergence_reports_each_cluster_once() {
    let mut det = ConvergenceDetector::new(ConvergenceParams::default());
    det.ingest(vec![
        event("protests:1", "protests", 41.03, 28.98, 30),
        event("outages:7", "outages", 41.05, 29.01, 10),
        // Far away, same types: its own, unconnected group.
        event("protests:2", "protests", 48.85, 2.35, 10),
    ]);
    let now = Utc::now();
    let first = det.detect(now);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].events.len(), 2);

    det.ingest(vec![event("outages:7", "outages", 41.05, 29.01, 10)]);
    assert!(det.detect(now).is_empty());
}

#[tokio::test]
async fn surge_and_foreign_presence_from_tracks() {
    let engine = CorrelationEngine::new(
        Arc::new(BaselineStore::new(BaselineParams::default())),
        LearningMode::new(false),
        CorrelationSettings::default(),
    );
    let track = |id: &str, op: &str| MilitaryTrack {
        id: id.into(),
        callsign: id.to_uppercase(),
        kind: TrackKind::Aircraft,
        lat: 24.5,
        lon: 119.5,
        operator_country: op.into(),
        observed_at: Utc::now(),
        ais_gap: false,
    };
    let input = |tracks: Vec<MilitaryTrack>| CorrelationInput {
        news: Vec::new(),
        layers: vec![(Domain::MilitaryFlights, LayerData::Tracks(tracks))],
    };

    for i in 0..4 {
        let quiet = input(vec![track(&format!("tw{i}"), "TW")]);
        let signals = engine.run_pass(&quiet, Utc::now()).await;
        assert!(signals.iter().all(|s| s.kind != SignalKind::Surge));
    }

    let busy: Vec<MilitaryTrack> = (0..6).map(|i| track(&format!("cn{i}"), "CN")).collect();
    let signals = engine.run_pass(&input(busy), Utc::now()).await;
    assert!(signals.iter().any(|s| s.kind == SignalKind::Surge));
    let foreign: Vec<_> = signals
        .iter()
        .filter(|s| s.kind == SignalKind::ForeignPresence)
        .collect();
    assert_eq!(foreign.len(), 1);
    assert_eq!(foreign[0].source_refs.len(), 6);
}

#[tokio::test]
async fn convergence_signal_reaches_the_sink_once() {
    let signals = Arc::new(RecordingSignals::default());
    let driver = Driver::builder(config_with(&[Domain::Protests, Domain::Conflicts]))
        .fetchers(LiveFetchers {
            incidents: Some(Arc::new(IstanbulIncidents)),
            ..LiveFetchers::default()
        })
        .signals(signals.clone())
        .build();

    let first = driver.load_all().await;
    assert_eq!(first.signals.len(), 1);
    assert_eq!(first.signals[0].kind, SignalKind::GeoConvergence);
    assert_eq!(first.signals[0].source_refs.len(), 2);

    let second = driver.load_all().await;
    assert!(second.signals.is_empty());
    assert_eq!(signals.emitted.lock().len(), 1);
}

#[tokio::test]
async fn learning_mode_keeps_the_sink_quiet() {
    let signals = Arc::new(RecordingSignals::default());
    let learning = LearningMode::new(true);
    let driver = Driver::builder(config_with(&[Domain::Protests, Domain::Conflicts]))
        .fetchers(LiveFetchers {
            incidents: Some(Arc::new(IstanbulIncidents)),
            ..LiveFetchers::default()
        })
        .learning(learning.clone())
        .signals(signals.clone())
        .build();

    let report = driver.load_all().await;
    assert!(report.signals.is_empty());
    assert!(signals.emitted.lock().is_empty());
    assert!(!driver.baseline().keys().is_empty());

    learning.set(false);
    assert!(!driver.learning().is_active());
}
