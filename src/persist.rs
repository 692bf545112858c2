// src/persist.rs
//! Persistent cache collaborator: `get(key) -> {data, updated_at} | None`,
//! `set(key, data)`. Callers treat `set` as fire-and-forget and swallow its
//! failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PersistedEntry>>;
    async fn set(&self, key: &str, data: serde_json::Value) -> Result<()>;
}

/// In-process store, handy for tests and for runs without a cache directory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry with an explicit timestamp.
    pub fn insert(&self, key: &str, data: serde_json::Value, updated_at: DateTime<Utc>) {
        let mut map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(key.to_string(), PersistedEntry { data, updated_at });
    }
}

#[async_trait]
impl PersistentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<PersistedEntry>> {
        let map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, data: serde_json::Value) -> Result<()> {
        self.insert(key, data, Utc::now());
        Ok(())
    }
}

/// One JSON file per key under a directory; writes go through a temp file
/// and a rename so readers never see a torn entry.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl PersistentCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<PersistedEntry>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let entry = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cache entry {}", path.display()))?;
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, data: serde_json::Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let entry = PersistedEntry {
            data,
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry).context("serializing cache entry")?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_cache_round_trip_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("layers"));

        assert!(cache.get("layer:weather").await.unwrap().is_none());

        cache.set("layer:weather", json!([{"id": "a"}])).await.unwrap();
        let got = cache.get("layer:weather").await.unwrap().unwrap();
        assert_eq!(got.data, json!([{"id": "a"}]));
        assert!(dir.path().join("layers/layer_weather.json").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        std::fs::write(dir.path().join("k.json"), "{not json").unwrap();
        assert!(cache.get("k").await.is_err());
    }
}
