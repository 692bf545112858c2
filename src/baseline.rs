//! # Baseline Store
//! Rolling per-metric count history with deviation statistics.
//!
//! Each metric key (`"news:politics"`, `"military_flights"`, ...) keeps a
//! bounded, ordered sequence of observed counts. A new observation is scored
//! against the history that precedes it: z-score, percent change against the
//! mean, and a level derived from fixed z thresholds.

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineParams {
    /// Counts kept per key; the oldest slides out first.
    pub max_history: usize,
    /// Below this many prior samples every deviation is `Normal` with z = 0.
    pub min_samples: usize,
    pub elevated_z: f64,
    pub high_z: f64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            max_history: 48,
            min_samples: 3,
            elevated_z: 1.5,
            high_z: 2.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationLevel {
    Normal,
    Elevated,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Deviation {
    pub z_score: f64,
    pub percent_change: f64,
    pub level: DeviationLevel,
    pub mean: f64,
    pub std_dev: f64,
    /// Number of prior samples the deviation was computed from.
    pub samples: usize,
}

impl Deviation {
    fn insufficient(current: f64, history: &[f64]) -> Self {
        let mean = mean(history);
        Self {
            z_score: 0.0,
            percent_change: percent_change(current, mean),
            level: DeviationLevel::Normal,
            mean,
            std_dev: 0.0,
            samples: history.len(),
        }
    }
}

/// Thread-safe store of per-key count histories. Keys are never deleted.
#[derive(Debug, Default)]
pub struct BaselineStore {
    inner: Mutex<HashMap<String, VecDeque<f64>>>,
    params: BaselineParams,
}

impl BaselineStore {
    pub fn new(params: BaselineParams) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            params,
        }
    }

    pub fn params(&self) -> &BaselineParams {
        &self.params
    }

    /// Append a count to the key's history, sliding out the oldest entry
    /// once `max_history` is reached.
    pub fn update_baseline(&self, key: &str, count: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let hist = inner.entry(key.to_string()).or_default();
        hist.push_back(count);
        while hist.len() > self.params.max_history.max(1) {
            hist.pop_front();
        }
    }

    /// Score `current` against the key's stored history (the history is not
    /// modified).
    pub fn calculate_deviation(&self, key: &str, current: f64) -> Deviation {
        let history = self.history(key);
        deviation_against(&history, current, &self.params)
    }

    /// Score the most recent stored value against the values before it.
    /// Returns `None` for unknown keys.
    pub fn deviation_of_latest(&self, key: &str) -> Option<Deviation> {
        let history = self.history(key);
        let (last, prior) = history.split_last()?;
        Some(deviation_against(prior, *last, &self.params))
    }

    /// Score `count` against the existing history, then record it.
    pub fn observe(&self, key: &str, count: f64) -> Deviation {
        let dev = self.calculate_deviation(key, count);
        self.update_baseline(key, count);
        dev
    }

    pub fn history(&self, key: &str) -> Vec<f64> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner
            .get(key)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = inner.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Pure deviation of `current` against `history` (population std-dev).
pub fn deviation_against(history: &[f64], current: f64, params: &BaselineParams) -> Deviation {
    if history.len() < params.min_samples.max(1) {
        return Deviation::insufficient(current, history);
    }

    let mean = mean(history);
    let variance =
        history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / history.len() as f64;
    let std_dev = variance.sqrt();

    // Flat history: any difference counts as one unit of spread.
    let denom = if std_dev > f64::EPSILON { std_dev } else { 1.0 };
    let z_score = (current - mean) / denom;

    let level = if z_score >= params.high_z {
        DeviationLevel::High
    } else if z_score >= params.elevated_z {
        DeviationLevel::Elevated
    } else {
        DeviationLevel::Normal
    };

    Deviation {
        z_score,
        percent_change: percent_change(current, mean),
        level,
        mean,
        std_dev,
        samples: history.len(),
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn percent_change(current: f64, mean: f64) -> f64 {
    if mean.abs() > f64::EPSILON {
        (current - mean) / mean * 100.0
    } else if current > 0.0 {
        100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_against_stable_history_is_high() {
        let store = BaselineStore::new(BaselineParams::default());
        for c in [10.0, 12.0, 11.0, 40.0] {
            store.update_baseline("vessels", c);
        }
        let dev = store.deviation_of_latest("vessels").unwrap();
        // mean 11, population std-dev sqrt(2/3)
        let expected = 29.0 / (2.0f64 / 3.0).sqrt();
        assert!((dev.z_score - expected).abs() < 1e-9);
        assert_eq!(dev.level, DeviationLevel::High);
        assert_eq!(dev.samples, 3);
        assert!((dev.percent_change - 29.0 / 11.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_samples_is_normal() {
        let store = BaselineStore::new(BaselineParams::default());
        store.update_baseline("k", 1.0);
        let dev = store.calculate_deviation("k", 100.0);
        assert_eq!(dev.level, DeviationLevel::Normal);
        assert_eq!(dev.z_score, 0.0);
    }

    #[test]
    fn history_slides() {
        let store = BaselineStore::new(BaselineParams {
            max_history: 3,
            ..BaselineParams::default()
        });
        for c in 1..=5 {
            store.update_baseline("k", c as f64);
        }
        assert_eq!(store.history("k"), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn drop_below_mean_stays_normal() {
        let store = BaselineStore::new(BaselineParams::default());
        for c in [50.0, 52.0, 48.0, 51.0] {
            store.update_baseline("k", c);
        }
        let dev = store.calculate_deviation("k", 5.0);
        assert!(dev.z_score < 0.0);
        assert_eq!(dev.level, DeviationLevel::Normal);
    }

    #[test]
    fn observe_scores_before_recording() {
        let store = BaselineStore::new(BaselineParams::default());
        for c in [5.0, 5.0, 5.0] {
            store.observe("flat", c);
        }
        let dev = store.observe("flat", 6.0);
        assert_eq!(dev.std_dev, 0.0);
        assert!((dev.z_score - 1.0).abs() < 1e-9);
        assert_eq!(store.history("flat").len(), 4);
    }
}
