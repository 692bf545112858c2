// src/flash.rs
//! Flash/dedup cache: suppresses repeat highlights of the same story.
//!
//! Keys are `(source id, link or title)`. An entry blocks the same key until
//! it is older than the cooldown; expired entries are swept on every use.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    pub cooldown_secs: i64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self { cooldown_secs: 600 }
    }
}

#[derive(Debug)]
pub struct FlashCache {
    cooldown: ChronoDuration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for FlashCache {
    fn default() -> Self {
        Self::new(FlashConfig::default())
    }
}

impl FlashCache {
    /// A negative cooldown is treated as zero.
    pub fn new(cfg: FlashConfig) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cfg.cooldown_secs.max(0)),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn key(source_id: &str, link: &str, title: &str) -> String {
        let ident = if link.trim().is_empty() { title.trim() } else { link.trim() };
        format!("{}\u{1f}{}", source_id, ident)
    }

    /// Returns `true` when the caller may act on the item, and records it.
    /// Returns `false` while the same key is inside its cooldown.
    pub fn check_and_mark(&self, source_id: &str, link: &str, title: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        let cooldown = self.cooldown;
        seen.retain(|_, ts| now.signed_duration_since(*ts) <= cooldown);

        let key = Self::key(source_id, link, title);
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }

    /// Number of live entries (after the last sweep).
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn repeat_inside_cooldown_is_suppressed() {
        let cache = FlashCache::default();
        assert!(cache.check_and_mark("bbc", "https://x/1", "Blast", t0()));
        assert!(!cache.check_and_mark("bbc", "https://x/1", "Blast (updated)", t0() + ChronoDuration::minutes(9)));
        // other source, same link: independent key
        assert!(cache.check_and_mark("reuters", "https://x/1", "Blast", t0()));
    }

    #[test]
    fn title_is_used_when_link_is_missing() {
        let cache = FlashCache::default();
        assert!(cache.check_and_mark("ap", "", "Quake hits coast", t0()));
        assert!(!cache.check_and_mark("ap", "  ", "Quake hits coast", t0()));
    }

    #[test]
    fn expired_entries_are_swept_on_use() {
        let cache = FlashCache::default();
        assert!(cache.check_and_mark("bbc", "a", "", t0()));
        assert!(cache.check_and_mark("bbc", "b", "", t0()));
        assert_eq!(cache.len(), 2);

        let later = t0() + ChronoDuration::minutes(11);
        assert!(cache.check_and_mark("bbc", "a", "", later));
        assert_eq!(cache.len(), 1);
    }
}
