// src/correlation/geo.rs
//! Geo-convergence: events of different source types close in space and time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::short_hash;
use crate::model::{GeoEvent, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceParams {
    pub radius_km: f64,
    pub window_hours: i64,
    /// Distinct source types a cluster needs before it is reported.
    pub min_source_types: usize,
}

impl Default for ConvergenceParams {
    fn default() -> Self {
        Self {
            radius_km: 50.0,
            window_hours: 6,
            min_source_types: 2,
        }
    }
}

impl ConvergenceParams {
    pub fn window(&self) -> ChronoDuration {
        ChronoDuration::hours(self.window_hours.max(0))
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceCluster {
    /// Stable key derived from the sorted member ids.
    pub key: String,
    pub events: Vec<GeoEvent>,
    pub source_types: BTreeSet<String>,
    pub centroid: GeoPoint,
}

/// Rolling window of recent events plus the keys of clusters already
/// reported. Events are keyed by id, so re-ingesting the same layer is a
/// no-op.
#[derive(Debug, Default)]
pub struct ConvergenceDetector {
    params: ConvergenceParams,
    window: HashMap<String, GeoEvent>,
    emitted: HashMap<String, DateTime<Utc>>,
}

impl ConvergenceDetector {
    pub fn new(params: ConvergenceParams) -> Self {
        Self {
            params,
            window: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    pub fn params(&self) -> &ConvergenceParams {
        &self.params
    }

    pub fn ingest(&mut self, events: impl IntoIterator<Item = GeoEvent>) {
        for ev in events {
            if ev.lat.is_finite() && ev.lon.is_finite() {
                self.window.insert(ev.id.clone(), ev);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.params.window();
        self.window.retain(|_, ev| now.signed_duration_since(ev.time) <= window);
        // A member id can only recur while it is inside the window.
        self.emitted
            .retain(|_, at| now.signed_duration_since(*at) <= window + window);
    }

    /// Clusters not reported before. Each returned cluster is remembered and
    /// never returned again.
    pub fn detect(&mut self, now: DateTime<Utc>) -> Vec<ConvergenceCluster> {
        self.prune(now);

        let mut events: Vec<&GeoEvent> = self.window.values().collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));

        let n = events.len();
        let mut parent: Vec<usize> = (0..n).collect();
        let window = self.params.window();
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (events[i], events[j]);
                let close_in_time = (a.time - b.time).abs() <= window;
                if close_in_time && haversine_km(a.lat, a.lon, b.lat, b.lon) <= self.params.radius_km {
                    union(&mut parent, i, j);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<&GeoEvent>> = HashMap::new();
        for (i, ev) in events.iter().enumerate() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(ev);
        }

        let mut out = Vec::new();
        for members in groups.into_values() {
            let types: BTreeSet<String> = members.iter().map(|e| e.kind.clone()).collect();
            if types.len() < self.params.min_source_types.max(2) {
                continue;
            }
            let ids: Vec<&str> = members.iter().map(|e| e.id.as_str()).collect();
            let key = short_hash(&ids.join("\n"));
            if self.emitted.contains_key(&key) {
                continue;
            }
            self.emitted.insert(key.clone(), now);

            let count = members.len() as f64;
            let centroid = GeoPoint {
                lat: members.iter().map(|e| e.lat).sum::<f64>() / count,
                lon: members.iter().map(|e| e.lon).sum::<f64>() / count,
            };
            out.push(ConvergenceCluster {
                key,
                events: members.into_iter().cloned().collect(),
                source_types: types,
                centroid,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[rb.max(ra)] = ra.min(rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ev(id: &str, kind: &str, lat: f64, lon: f64, t: DateTime<Utc>) -> GeoEvent {
        GeoEvent {
            id: id.into(),
            lat,
            lon,
            kind: kind.into(),
            time: t,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn haversine_paris_london() {
        let d = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((d - 343.5).abs() < 2.0, "{d}");
    }

    #[test]
    fn two_types_converge_once() {
        let mut det = ConvergenceDetector::new(ConvergenceParams::default());
        let events = vec![
            ev("protests:1", "protests", 50.45, 30.52, now() - ChronoDuration::hours(1)),
            ev("military_flights:7", "military_flights", 50.60, 30.40, now()),
        ];
        det.ingest(events.clone());
        let first = det.detect(now());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].events.len(), 2);

        det.ingest(events);
        assert!(det.detect(now()).is_empty());
    }

    #[test]
    fn same_type_or_far_apart_does_not_converge() {
        let mut det = ConvergenceDetector::new(ConvergenceParams::default());
        det.ingest(vec![
            ev("protests:1", "protests", 50.45, 30.52, now()),
            ev("protests:2", "protests", 50.46, 30.53, now()),
            ev("outages:1", "outages", 40.0, -3.7, now()),
        ]);
        assert!(det.detect(now()).is_empty());
    }

    #[test]
    fn events_outside_time_window_are_dropped() {
        let mut det = ConvergenceDetector::new(ConvergenceParams::default());
        det.ingest(vec![
            ev("conflicts:1", "conflicts", 31.5, 34.47, now() - ChronoDuration::hours(7)),
            ev("outages:9", "outages", 31.5, 34.47, now()),
        ]);
        assert!(det.detect(now()).is_empty());
        assert_eq!(det.len(), 1);
    }

    #[test]
    fn cluster_key_ignores_ingest_order() {
        let a = ev("a", "protests", 1.0, 1.0, now());
        let b = ev("b", "outages", 1.0, 1.01, now());
        let mut d1 = ConvergenceDetector::new(ConvergenceParams::default());
        d1.ingest(vec![a.clone(), b.clone()]);
        let mut d2 = ConvergenceDetector::new(ConvergenceParams::default());
        d2.ingest(vec![b, a]);
        assert_eq!(d1.detect(now())[0].key, d2.detect(now())[0].key);
    }
}
