// tests/common/mod.rs
// Recording doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use situation_ingest::correlation::Signal;
use situation_ingest::fallback::generative::CompletionClient;
use situation_ingest::fallback::SourceFetcher;
use situation_ingest::ingest::{FeedFetcher, FeedSource, NewsCategory};
use situation_ingest::model::{FetchOutcome, GeoPoint};
use situation_ingest::{Domain, FreshnessSink, LadderSource, LayerData, NewsItem, NewsUpdate, RenderSink, SignalSink};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    News {
        category: String,
        count: usize,
        update: NewsUpdate,
    },
    Layer {
        domain: Domain,
        data: LayerData,
        source: LadderSource,
        ready: bool,
    },
    Unavailable {
        domain: Domain,
        reason: String,
    },
    Highlight {
        at: GeoPoint,
        label: String,
    },
    Error {
        scope: String,
        message: String,
    },
}

#[derive(Default)]
pub struct RecordingRender {
    pub calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRender {
    pub fn layers(&self, domain: Domain) -> Vec<(LayerData, LadderSource, bool)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RenderCall::Layer {
                    domain: d,
                    data,
                    source,
                    ready,
                } if *d == domain => Some((data.clone(), *source, *ready)),
                _ => None,
            })
            .collect()
    }

    pub fn unavailable(&self) -> Vec<Domain> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RenderCall::Unavailable { domain, .. } => Some(*domain),
                _ => None,
            })
            .collect()
    }

    pub fn news(&self, category: &str) -> Vec<(usize, NewsUpdate)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RenderCall::News {
                    category: cat,
                    count,
                    update,
                } if cat == category => Some((*count, *update)),
                _ => None,
            })
            .collect()
    }

    pub fn highlights(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RenderCall::Highlight { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RenderSink for RecordingRender {
    fn set_news(&self, category: &str, items: &[NewsItem], update: NewsUpdate) {
        self.calls.lock().push(RenderCall::News {
            category: category.to_string(),
            count: items.len(),
            update,
        });
    }

    fn set_layer(&self, domain: Domain, data: &LayerData, source: LadderSource, ready: bool) {
        self.calls.lock().push(RenderCall::Layer {
            domain,
            data: data.clone(),
            source,
            ready,
        });
    }

    fn show_unavailable(&self, domain: Domain, reason: &str) {
        self.calls.lock().push(RenderCall::Unavailable {
            domain,
            reason: reason.to_string(),
        });
    }

    fn highlight(&self, at: GeoPoint, label: &str) {
        self.calls.lock().push(RenderCall::Highlight {
            at,
            label: label.to_string(),
        });
    }

    fn show_error(&self, scope: &str, message: &str) {
        self.calls.lock().push(RenderCall::Error {
            scope: scope.to_string(),
            message: message.to_string(),
        });
    }
}

#[derive(Default)]
pub struct RecordingFreshness {
    pub updates: Mutex<Vec<(String, usize)>>,
    pub errors: Mutex<Vec<(String, String)>>,
}

impl RecordingFreshness {
    /// Total records (updates and errors) for one source.
    pub fn records_for(&self, source: &str) -> usize {
        self.updates.lock().iter().filter(|(s, _)| s == source).count()
            + self.errors.lock().iter().filter(|(s, _)| s == source).count()
    }
}

impl FreshnessSink for RecordingFreshness {
    fn record_update(&self, source_id: &str, count: usize) {
        self.updates.lock().push((source_id.to_string(), count));
    }

    fn record_error(&self, source_id: &str, message: &str) {
        self.errors.lock().push((source_id.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSignals {
    pub emitted: Mutex<Vec<Signal>>,
}

impl SignalSink for RecordingSignals {
    fn emit(&self, signals: &[Signal]) {
        self.emitted.lock().extend(signals.iter().cloned());
    }
}

/// Feed fetcher serving canned items per feed name, with an optional delay
/// per feed. Records every feed it was asked for.
#[derive(Default)]
pub struct ScriptedFeeds {
    pub items: HashMap<String, Vec<NewsItem>>,
    pub delays: HashMap<String, Duration>,
    pub failing: Vec<String>,
    pub requested: Mutex<Vec<String>>,
}

impl ScriptedFeeds {
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFeeds {
    async fn fetch_feed(&self, feed: &FeedSource, category: &str) -> anyhow::Result<Vec<NewsItem>> {
        self.requested.lock().push(feed.name.clone());
        if let Some(d) = self.delays.get(&feed.name) {
            tokio::time::sleep(*d).await;
        }
        if self.failing.contains(&feed.name) {
            anyhow::bail!("{} is down", feed.name);
        }
        Ok(self
            .items
            .get(&feed.name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut i| {
                i.category = category.to_string();
                i
            })
            .collect())
    }
}

/// Generic live fetcher that counts calls and replays one outcome.
pub struct CountingFetcher<T> {
    pub calls: AtomicUsize,
    pub outcome: FetchOutcome<T>,
    pub delay: Duration,
}

impl<T> CountingFetcher<T> {
    pub fn new(outcome: FetchOutcome<T>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> SourceFetcher<T> for CountingFetcher<T> {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch(&self, _domain: Domain) -> anyhow::Result<FetchOutcome<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.outcome.clone())
    }
}

/// Completion client returning a canned body and counting calls.
pub struct CannedCompletion {
    pub name: String,
    pub body: String,
    pub calls: AtomicUsize,
}

impl CannedCompletion {
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for CannedCompletion {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

pub fn news_item(source: &str, title: &str, link: &str, published_at: DateTime<Utc>) -> NewsItem {
    NewsItem {
        source: source.to_string(),
        title: title.to_string(),
        link: link.to_string(),
        published_at,
        category: String::new(),
        is_alert: false,
        location: None,
    }
}

pub fn category(name: &str, feeds: &[&str]) -> NewsCategory {
    NewsCategory {
        name: name.to_string(),
        feeds: feeds
            .iter()
            .map(|f| FeedSource::new(f, &format!("https://feeds.example.com/{f}.xml")))
            .collect(),
    }
}

pub fn shared<T>(v: T) -> Arc<T> {
    Arc::new(v)
}

/// Config scheduling exactly `domains` (every other layer switched off).
pub fn config_with(domains: &[Domain]) -> situation_ingest::IngestConfig {
    let mut cfg = situation_ingest::IngestConfig::default();
    for d in Domain::ALL {
        cfg.enabled_layers.insert(d.as_str().to_string(), domains.contains(&d));
    }
    cfg
}
