// src/correlation/military.rs
//! Regional surge and foreign-presence detection over military tracks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Severity, Signal, SignalKind};
use crate::baseline::{BaselineStore, DeviationLevel};
use crate::model::{GeoPoint, MilitaryTrack};

/// Watched region: a lat/lon box and the operators normally present there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    #[serde(default)]
    pub expected_operators: Vec<String>,
}

impl Region {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn expects(&self, operator: &str) -> bool {
        self.expected_operators
            .iter()
            .any(|o| o.eq_ignore_ascii_case(operator.trim()))
    }

    fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lon: (self.min_lon + self.max_lon) / 2.0,
        }
    }

    pub fn baseline_key(&self) -> String {
        format!("military:{}", self.name)
    }
}

fn region(name: &str, lat: (f64, f64), lon: (f64, f64), ops: &[&str]) -> Region {
    Region {
        name: name.to_string(),
        min_lat: lat.0,
        max_lat: lat.1,
        min_lon: lon.0,
        max_lon: lon.1,
        expected_operators: ops.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn default_regions() -> Vec<Region> {
    vec![
        region("baltic", (53.0, 66.0), (9.0, 30.0), &["DE", "DK", "SE", "FI", "PL", "EE", "LV", "LT", "NATO"]),
        region("black_sea", (40.5, 47.5), (27.0, 42.0), &["TR", "RO", "BG", "UA"]),
        region("eastern_med", (30.0, 37.5), (25.0, 36.5), &["GR", "CY", "TR", "IL", "EG"]),
        region("persian_gulf", (23.0, 30.5), (47.0, 57.0), &["SA", "AE", "QA", "BH", "KW", "OM", "IR"]),
        region("taiwan_strait", (22.0, 26.5), (117.0, 122.5), &["TW"]),
        region("south_china_sea", (3.0, 22.0), (105.0, 121.0), &["PH", "VN", "MY", "BN", "ID"]),
        region("korean_peninsula", (33.0, 43.0), (124.0, 131.0), &["KR"]),
    ]
}

fn severity_for(level: DeviationLevel) -> Severity {
    match level {
        DeviationLevel::High => Severity::High,
        DeviationLevel::Elevated => Severity::Medium,
        DeviationLevel::Normal => Severity::Low,
    }
}

/// Observe per-region track counts and report regions above their norm.
/// Every region is observed each pass, so quiet regions record zero.
pub fn detect_surges(
    baseline: &BaselineStore,
    regions: &[Region],
    tracks: &[MilitaryTrack],
    now: DateTime<Utc>,
) -> Vec<Signal> {
    let mut out = Vec::new();
    for r in regions {
        let members: Vec<&MilitaryTrack> = tracks.iter().filter(|t| r.contains(t.lat, t.lon)).collect();
        let dev = baseline.observe(&r.baseline_key(), members.len() as f64);
        if dev.level == DeviationLevel::Normal {
            continue;
        }
        let title = format!(
            "Military activity surge in {}: {} tracks ({:+.0}% vs norm, z={:.1})",
            r.name.replace('_', " "),
            members.len(),
            dev.percent_change,
            dev.z_score
        );
        let key = format!("{}:{:?}", r.name, dev.level);
        out.push(
            Signal::new(SignalKind::Surge, &key, severity_for(dev.level), title, now)
                .with_refs(members.iter().map(|t| t.id.clone()))
                .with_location(r.center()),
        );
    }
    out
}

/// One signal per (region, operator country) with tracks from an operator the
/// region does not normally host.
pub fn detect_foreign_presence(regions: &[Region], tracks: &[MilitaryTrack], now: DateTime<Utc>) -> Vec<Signal> {
    let mut out = Vec::new();
    for r in regions {
        let mut by_country: BTreeMap<String, Vec<&MilitaryTrack>> = BTreeMap::new();
        for t in tracks.iter().filter(|t| r.contains(t.lat, t.lon)) {
            let op = t.operator_country.trim().to_ascii_uppercase();
            if op.is_empty() || r.expects(&op) {
                continue;
            }
            by_country.entry(op).or_default().push(t);
        }
        for (country, members) in by_country {
            let severity = if members.len() >= 3 { Severity::High } else { Severity::Medium };
            let title = format!(
                "{} {} operator {} in {}",
                members.len(),
                if members.len() == 1 { "track from" } else { "tracks from" },
                country,
                r.name.replace('_', " ")
            );
            out.push(
                Signal::new(SignalKind::ForeignPresence, &format!("{}:{}", r.name, country), severity, title, now)
                    .with_refs(members.iter().map(|t| t.id.clone()))
                    .with_location(r.center()),
            );
        }
    }
    out
}
