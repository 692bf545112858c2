// src/ingest/mod.rs
//! Category-chunked news fetch pipeline.
//!
//! Categories are processed in chunks of `min(cap, remaining)`; chunks run
//! one after another, categories inside a chunk run concurrently. Inside a
//! category every enabled feed is fetched (bounded by `feed_concurrency`)
//! and partial unions are pushed through a [`gate::RenderGate`] to the
//! caller's [`BatchObserver`].

pub mod gate;
pub mod rss;

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::IngestError;
use crate::model::NewsItem;
use gate::RenderGate;

/// Normalize text: decode entities, strip tags, collapse whitespace, trim
/// trailing punctuation, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<Option<regex::Regex>> = once_cell::sync::OnceCell::new();
    if let Some(re) = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").ok()) {
        out = re.replace_all(&out, "").to_string();
    }

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }
    out
}

/// One feed of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Source name; matched against the disabled-sources set.
    pub name: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsCategory {
    pub name: String,
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
}

/// Final state of a category fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CategoryStatus {
    Ok,
    /// Every fetch succeeded but nothing came back.
    Empty,
    /// No items and at least one feed failed.
    Failed { failed_feeds: usize },
    /// Every feed is administratively disabled; nothing was fetched.
    Disabled,
}

impl CategoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryStatus::Ok => "ok",
            CategoryStatus::Empty => "empty",
            CategoryStatus::Failed { .. } => "failed",
            CategoryStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryResult {
    pub category: String,
    pub items: Vec<NewsItem>,
    pub status: CategoryStatus,
    /// Feeds actually requested.
    pub feeds_fetched: usize,
    pub feed_errors: Vec<(String, IngestError)>,
}

/// Fetches one feed. Implementations should not retry; the pipeline applies
/// a per-feed timeout.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(&self, feed: &FeedSource, category: &str) -> anyhow::Result<Vec<NewsItem>>;
}

/// Receives partial unions of a category's items while it is loading.
/// Called zero or more times per category, always before the category's
/// final result is returned.
pub trait BatchObserver: Send + Sync {
    fn on_batch(&self, category: &str, items: &[NewsItem]);
}

/// Observer that ignores partial batches.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn on_batch(&self, _category: &str, _items: &[NewsItem]) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Categories per chunk.
    pub concurrency: usize,
    /// Concurrent feeds inside one category.
    pub feed_concurrency: usize,
    pub feed_timeout: Duration,
    pub flush_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            feed_concurrency: 6,
            feed_timeout: Duration::from_secs(20),
            flush_interval: Duration::from_millis(100),
        }
    }
}

pub struct NewsPipeline {
    fetcher: Arc<dyn FeedFetcher>,
    disabled: BTreeSet<String>,
    settings: PipelineSettings,
}

impl NewsPipeline {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, settings: PipelineSettings) -> Self {
        Self {
            fetcher,
            disabled: BTreeSet::new(),
            settings,
        }
    }

    pub fn with_disabled_sources(mut self, disabled: impl IntoIterator<Item = String>) -> Self {
        self.disabled = disabled.into_iter().map(|s| s.trim().to_string()).collect();
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn is_disabled(&self, feed: &FeedSource) -> bool {
        self.disabled.contains(feed.name.trim())
    }

    /// Fetch every category, chunk by chunk. Results come back in input order.
    pub async fn fetch_categories(
        &self,
        categories: &[NewsCategory],
        observer: &dyn BatchObserver,
    ) -> Vec<CategoryResult> {
        let cap = self.settings.concurrency.max(1);
        let mut results = Vec::with_capacity(categories.len());
        let mut rest = categories;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(cap.min(rest.len()));
            tracing::debug!(target: "ingest", categories = chunk.len(), remaining = tail.len(), "fetching chunk");
            let fetched = join_all(chunk.iter().map(|c| self.fetch_category(c, observer))).await;
            results.extend(fetched);
            rest = tail;
        }
        results
    }

    pub async fn fetch_category(&self, category: &NewsCategory, observer: &dyn BatchObserver) -> CategoryResult {
        let name = category.name.as_str();
        let enabled: Vec<&FeedSource> = category.feeds.iter().filter(|f| !self.is_disabled(f)).collect();
        if enabled.is_empty() {
            tracing::info!(target: "ingest", category = name, "all sources disabled");
            return CategoryResult {
                category: name.to_string(),
                items: Vec::new(),
                status: CategoryStatus::Disabled,
                feeds_fetched: 0,
                feed_errors: Vec::new(),
            };
        }

        let feeds_fetched = enabled.len();
        let timeout = self.settings.feed_timeout;
        let fetcher = &self.fetcher;
        let mut pending = futures::stream::iter(enabled.into_iter().map(|feed| async move {
                let res = tokio::time::timeout(timeout, fetcher.fetch_feed(feed, name)).await;
                (feed, res)
            }).collect::<Vec<_>>())
            .buffer_unordered(self.settings.feed_concurrency.max(1));

        let mut gate: RenderGate<Vec<NewsItem>> = RenderGate::new(self.settings.flush_interval);
        let mut items: Vec<NewsItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut feed_errors = Vec::new();

        loop {
            let deadline = gate.deadline();
            tokio::select! {
                next = pending.next() => {
                    let Some((feed, res)) = next else { break };
                    match res {
                        Ok(Ok(batch)) => {
                            let before = items.len();
                            for item in batch {
                                if seen.insert(dedup_key(&item)) {
                                    items.push(item);
                                }
                            }
                            if items.len() > before {
                                if let Some(b) = gate.offer(items.clone(), Instant::now()) {
                                    observer.on_batch(name, &b);
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            let err = IngestError::classify(&e);
                            tracing::warn!(target: "ingest", category = name, feed = %feed.name, error = %err, "feed failed");
                            counter!("ingest_feed_errors_total", "kind" => err.kind()).increment(1);
                            feed_errors.push((feed.name.clone(), err));
                        }
                        Err(_) => {
                            tracing::warn!(target: "ingest", category = name, feed = %feed.name, timeout_secs = timeout.as_secs(), "feed timed out");
                            counter!("ingest_feed_errors_total", "kind" => "timeout").increment(1);
                            feed_errors.push((feed.name.clone(), IngestError::Timeout(timeout)));
                        }
                    }
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    if let Some(b) = gate.poll_due(Instant::now()) {
                        observer.on_batch(name, &b);
                    }
                }
            }
        }

        // Trailing flush: respect the interval, never drop the last batch.
        if let Some(due) = gate.deadline() {
            tokio::time::sleep_until(due).await;
            if let Some(b) = gate.drain(Instant::now()) {
                observer.on_batch(name, &b);
            }
        }

        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        counter!("ingest_items_total", "category" => name.to_string()).increment(items.len() as u64);

        let status = if !items.is_empty() {
            CategoryStatus::Ok
        } else if !feed_errors.is_empty() {
            CategoryStatus::Failed {
                failed_feeds: feed_errors.len(),
            }
        } else {
            CategoryStatus::Empty
        };
        tracing::debug!(target: "ingest", category = name, items = items.len(), status = status.as_str(), "category settled");

        CategoryResult {
            category: name.to_string(),
            items,
            status,
            feeds_fetched,
            feed_errors,
        }
    }
}

fn dedup_key(item: &NewsItem) -> String {
    if item.link.is_empty() {
        item.title.to_lowercase()
    } else {
        item.link.clone()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        let s = "  Hello,&nbsp;&nbsp; <b>world</b>!!!  ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn normalize_text_maps_curly_quotes() {
        assert_eq!(normalize_text("\u{201C}Ceasefire\u{201D} holds"), "\"Ceasefire\" holds");
    }

    #[test]
    fn status_labels() {
        assert_eq!(CategoryStatus::Failed { failed_feeds: 2 }.as_str(), "failed");
        assert_eq!(CategoryStatus::Disabled.as_str(), "disabled");
    }
}
