// src/driver.rs
//! Orchestration driver: one load cycle per call.
//!
//! The driver owns every piece of process-wide state (scheduler, ladders and
//! their caches, baselines, flash cache, learning flag) and hands it to the
//! components by reference. A cycle builds one guarded task per scheduled
//! domain plus one for news, joins them all, runs a correlation pass over
//! the live results and finally makes sure every scheduled layer shows
//! something.

use chrono::Utc;
use metrics::histogram;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::baseline::BaselineStore;
use crate::config::IngestConfig;
use crate::correlation::{CorrelationEngine, CorrelationInput, Enrichment, LearningMode, Signal};
use crate::fallback::generative::{ChatCompletionsClient, CompletionClient, DailyBudget, GenerativeProvider};
use crate::fallback::{statics, DomainLoader, FallbackLadder, LadderSource, SourceFetcher};
use crate::flash::FlashCache;
use crate::ingest::rss::RssFeedFetcher;
use crate::ingest::{BatchObserver, CategoryStatus, FeedFetcher, NewsPipeline};
use crate::model::{Domain, GeoIncident, Indicator, LayerItem, MilitaryTrack, NewsItem, Quote, WeatherAlert};
use crate::persist::{FileCache, MemoryCache, PersistentCache};
use crate::scheduler::{GuardedScheduler, SourceTask, TaskOutcome};
use crate::sinks::{FreshnessSink, NewsUpdate, RenderSink, SignalSink};
use crate::telemetry::ensure_metrics_described;

/// Task name used for the news pipeline.
pub const NEWS_TASK: &str = "news";

/// Live upstreams per record type. A missing fetcher means the domain starts
/// at its generative rungs.
#[derive(Clone, Default)]
pub struct LiveFetchers {
    pub quotes: Option<Arc<dyn SourceFetcher<Quote>>>,
    pub weather: Option<Arc<dyn SourceFetcher<WeatherAlert>>>,
    pub incidents: Option<Arc<dyn SourceFetcher<GeoIncident>>>,
    pub tracks: Option<Arc<dyn SourceFetcher<MilitaryTrack>>>,
    pub indicators: Option<Arc<dyn SourceFetcher<Indicator>>>,
    pub news: Option<Arc<dyn FeedFetcher>>,
}

/// How one task of a cycle settled.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub name: String,
    pub outcome: TaskOutcome,
    /// Ladder step that produced the layer (domain tasks that ran).
    pub source: Option<LadderSource>,
    pub items: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub tasks: Vec<TaskReport>,
    pub signals: Vec<Signal>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Per-cycle scratch shared by the tasks of that cycle.
#[derive(Default)]
struct CycleScratch {
    input: CorrelationInput,
    sources: BTreeMap<String, (LadderSource, usize)>,
}

struct Shared {
    config: IngestConfig,
    loaders: BTreeMap<Domain, Arc<dyn DomainLoader>>,
    pipeline: Option<NewsPipeline>,
    engine: CorrelationEngine,
    flash: FlashCache,
    render: Arc<dyn RenderSink>,
    freshness: Arc<dyn FreshnessSink>,
    signals: Arc<dyn SignalSink>,
    ready: Mutex<BTreeSet<Domain>>,
}

pub struct Driver {
    scheduler: GuardedScheduler,
    shared: Arc<Shared>,
}

impl Driver {
    pub fn builder(config: IngestConfig) -> DriverBuilder {
        DriverBuilder {
            config,
            fetchers: LiveFetchers::default(),
            generative: Vec::new(),
            persist: None,
            render: None,
            freshness: None,
            signals: None,
            learning: LearningMode::default(),
            baseline: None,
            enrichments: Vec::new(),
            overrides: Vec::new(),
            without: BTreeSet::new(),
        }
    }

    /// Driver wired from configuration alone: RSS news, the configured
    /// generative providers, and file- or memory-backed persistence.
    pub fn from_config(
        config: IngestConfig,
        render: Arc<dyn RenderSink>,
        freshness: Arc<dyn FreshnessSink>,
        signals: Arc<dyn SignalSink>,
    ) -> anyhow::Result<Self> {
        let rss = RssFeedFetcher::from_config(&config)?;
        let mut clients: Vec<Arc<dyn CompletionClient>> = Vec::new();
        for p in config.generative.resolved_providers() {
            clients.push(Arc::new(ChatCompletionsClient::new(&p.name, &p.base_url, &p.model, &p.api_key)?));
        }
        let persist: Arc<dyn PersistentCache> = match &config.cache_dir {
            Some(dir) => Arc::new(FileCache::new(dir.clone())),
            None => Arc::new(MemoryCache::new()),
        };
        let fetchers = LiveFetchers {
            news: Some(Arc::new(rss)),
            ..LiveFetchers::default()
        };
        let mut builder = Driver::builder(config)
            .fetchers(fetchers)
            .persist(persist)
            .render(render)
            .freshness(freshness)
            .signals(signals);
        for c in clients {
            builder = builder.generative(c);
        }
        Ok(builder.build())
    }

    pub fn scheduler(&self) -> &GuardedScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &IngestConfig {
        &self.shared.config
    }

    pub fn learning(&self) -> &LearningMode {
        self.shared.engine.learning()
    }

    pub fn baseline(&self) -> &Arc<BaselineStore> {
        self.shared.engine.baseline()
    }

    pub fn loader(&self, domain: Domain) -> Option<&Arc<dyn DomainLoader>> {
        self.shared.loaders.get(&domain)
    }

    /// Stop scheduling new work. Running calls finish or time out on their own.
    pub fn destroy(&self) {
        tracing::info!(target: "driver", "destroy requested");
        self.scheduler.destroy();
    }

    /// Domains scheduled this cycle that have a task to run.
    fn scheduled(&self) -> Vec<Domain> {
        self.shared.config.scheduled_domains()
    }

    /// Run one full load cycle. Never fails; see the report for per-task
    /// outcomes.
    pub async fn load_all(&self) -> CycleReport {
        let started = tokio::time::Instant::now();
        let scratch = Arc::new(Mutex::new(CycleScratch::default()));

        let mut tasks = Vec::new();
        if self.shared.pipeline.is_some() && !self.shared.config.news.categories.is_empty() {
            tasks.push(self.news_task(Arc::clone(&scratch)));
        }
        for domain in self.scheduled() {
            if self.shared.loaders.contains_key(&domain) {
                tasks.push(self.domain_task(domain, Arc::clone(&scratch)));
            }
        }
        tracing::info!(target: "driver", tasks = tasks.len(), variant = ?self.shared.config.variant, "load cycle started");

        let outcomes = self.scheduler.run_all(tasks).await;
        for (name, outcome) in &outcomes {
            if let TaskOutcome::Failed(msg) = outcome {
                self.shared.freshness.record_error(name, msg);
            }
        }

        let (input, sources) = {
            let mut s = scratch.lock().unwrap_or_else(|p| p.into_inner());
            (std::mem::take(&mut s.input), std::mem::take(&mut s.sources))
        };

        let signals = if self.scheduler.is_destroyed() {
            Vec::new()
        } else {
            let signals = self.shared.engine.run_pass(&input, Utc::now()).await;
            if !signals.is_empty() {
                self.shared.signals.emit(&signals);
            }
            signals
        };

        self.ensure_populated();

        let tasks = outcomes
            .into_iter()
            .map(|(name, outcome)| {
                let (source, items) = match sources.get(&name) {
                    Some((s, n)) => (Some(*s), *n),
                    None => (None, 0),
                };
                TaskReport {
                    name,
                    outcome,
                    source,
                    items,
                }
            })
            .collect();

        let duration = started.elapsed();
        histogram!("ingest_cycle_duration_ms").record(duration.as_secs_f64() * 1_000.0);
        tracing::info!(target: "driver", elapsed_ms = duration.as_millis() as u64, signals = signals.len(), "load cycle finished");
        CycleReport {
            tasks,
            signals,
            duration,
        }
    }

    /// Guarded load of a single domain, outside a full cycle.
    pub async fn load_domain(&self, domain: Domain) -> TaskReport {
        let scratch = Arc::new(Mutex::new(CycleScratch::default()));
        let name = domain.as_str().to_string();
        let outcome = if self.shared.loaders.contains_key(&domain) {
            let task = self.domain_task(domain, Arc::clone(&scratch));
            let mut results = self.scheduler.run_all(vec![task]).await;
            results.pop().map(|(_, o)| o).unwrap_or(TaskOutcome::Completed)
        } else {
            self.shared.render.show_unavailable(domain, "no data source configured");
            TaskOutcome::Completed
        };
        if let TaskOutcome::Failed(msg) = &outcome {
            self.shared.freshness.record_error(&name, msg);
        }
        let s = scratch.lock().unwrap_or_else(|p| p.into_inner());
        let (source, items) = match s.sources.get(&name) {
            Some((src, n)) => (Some(*src), *n),
            None => (None, 0),
        };
        TaskReport {
            name,
            outcome,
            source,
            items,
        }
    }

    /// Every scheduled domain not yet rendered gets its static dataset, or an
    /// explicit unavailable status when it has none.
    pub fn ensure_populated(&self) {
        if self.scheduler.is_destroyed() {
            return;
        }
        let shared = &self.shared;
        let mut ready = shared.ready.lock().unwrap_or_else(|p| p.into_inner());
        for domain in self.scheduled() {
            if ready.contains(&domain) {
                continue;
            }
            match shared.loaders.get(&domain).and_then(|l| l.static_layer()) {
                Some(layer) => {
                    tracing::info!(target: "driver", %domain, "populating from static dataset");
                    shared.render.set_layer(domain, &layer, LadderSource::Static, true);
                    ready.insert(domain);
                }
                None => {
                    tracing::warn!(target: "driver", %domain, "no data and no fallback");
                    shared.render.show_unavailable(domain, "no fallback dataset");
                }
            }
        }
    }

    fn domain_task(&self, domain: Domain, scratch: Arc<Mutex<CycleScratch>>) -> SourceTask {
        let shared = Arc::clone(&self.shared);
        let cancel = self.scheduler.destroyed_token();
        SourceTask::new(domain.as_str(), move || async move {
            let Some(loader) = shared.loaders.get(&domain) else {
                return Ok(());
            };
            let load = loader.load(&cancel).await;
            if cancel.is_cancelled() {
                tracing::debug!(target: "driver", %domain, "destroyed while loading, result dropped");
                return Ok(());
            }

            let count = load.data.len();
            {
                let mut s = scratch.lock().unwrap_or_else(|p| p.into_inner());
                s.sources.insert(domain.as_str().to_string(), (load.source, count));
                if load.source == LadderSource::Live {
                    s.input.layers.push((domain, load.data.clone()));
                }
            }

            match load.source {
                LadderSource::Exhausted => {
                    let msg = summarize_errors(&load.errors);
                    shared.render.show_unavailable(domain, &msg);
                    shared.freshness.record_error(domain.as_str(), &msg);
                }
                source => {
                    shared.render.set_layer(domain, &load.data, source, true);
                    shared.ready.lock().unwrap_or_else(|p| p.into_inner()).insert(domain);
                    if source == LadderSource::Static {
                        shared.freshness.record_error(domain.as_str(), &summarize_errors(&load.errors));
                    } else {
                        shared.freshness.record_update(domain.as_str(), count);
                    }
                }
            }
            anyhow::Ok(())
        })
    }

    fn news_task(&self, scratch: Arc<Mutex<CycleScratch>>) -> SourceTask {
        let shared = Arc::clone(&self.shared);
        let cancel = self.scheduler.destroyed_token();
        SourceTask::new(NEWS_TASK, move || async move {
            let Some(pipeline) = shared.pipeline.as_ref() else {
                return Ok(());
            };
            let observer = PartialNews {
                render: shared.render.as_ref(),
            };
            let results = pipeline
                .fetch_categories(&shared.config.news.categories, &observer)
                .await;
            if cancel.is_cancelled() {
                return Ok(());
            }

            let mut total = 0usize;
            let mut failed = Vec::new();
            let mut settled = Vec::new();
            for r in results {
                shared
                    .render
                    .set_news(&r.category, &r.items, NewsUpdate::Final(r.status));
                match r.status {
                    CategoryStatus::Failed { failed_feeds } => {
                        shared
                            .render
                            .show_error(&format!("news:{}", r.category), &format!("{failed_feeds} feeds failed"));
                        failed.push(r.category.clone());
                    }
                    CategoryStatus::Disabled => {
                        tracing::info!(target: "driver", category = %r.category, "all sources disabled");
                    }
                    CategoryStatus::Ok | CategoryStatus::Empty => {
                        flash_locations(&shared, &r.items);
                        total += r.items.len();
                        settled.push((r.category, r.items));
                    }
                }
            }

            let all_failed = settled.is_empty() && !failed.is_empty();
            {
                let mut s = scratch.lock().unwrap_or_else(|p| p.into_inner());
                s.sources.insert(NEWS_TASK.to_string(), (LadderSource::Live, total));
                s.input.news.extend(settled);
            }
            if all_failed {
                anyhow::bail!("every news category failed: {}", failed.join(", "));
            }
            shared.freshness.record_update(NEWS_TASK, total);
            Ok(())
        })
    }
}

/// Alert items with a location are highlighted once per cooldown.
fn flash_locations(shared: &Shared, items: &[NewsItem]) {
    let now = Utc::now();
    for item in items.iter().filter(|i| i.is_alert) {
        let Some(at) = item.location else { continue };
        if shared.flash.check_and_mark(&item.source, &item.link, &item.title, now) {
            shared.render.highlight(at, &item.title);
        }
    }
}

fn summarize_errors(errors: &[(String, crate::error::IngestError)]) -> String {
    if errors.is_empty() {
        return "no upstream configured".to_string();
    }
    errors
        .iter()
        .map(|(p, e)| format!("{p}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

struct PartialNews<'a> {
    render: &'a dyn RenderSink,
}

impl BatchObserver for PartialNews<'_> {
    fn on_batch(&self, category: &str, items: &[NewsItem]) {
        self.render.set_news(category, items, NewsUpdate::Partial);
    }
}

struct NullSinks;

impl RenderSink for NullSinks {
    fn set_news(&self, _c: &str, _i: &[NewsItem], _u: NewsUpdate) {}
    fn set_layer(&self, _d: Domain, _l: &crate::model::LayerData, _s: LadderSource, _r: bool) {}
    fn show_unavailable(&self, _d: Domain, _r: &str) {}
    fn highlight(&self, _a: crate::model::GeoPoint, _l: &str) {}
    fn show_error(&self, _s: &str, _m: &str) {}
}

impl FreshnessSink for NullSinks {
    fn record_update(&self, _s: &str, _c: usize) {}
    fn record_error(&self, _s: &str, _m: &str) {}
}

impl SignalSink for NullSinks {
    fn emit(&self, _s: &[Signal]) {}
}

pub struct DriverBuilder {
    config: IngestConfig,
    fetchers: LiveFetchers,
    generative: Vec<Arc<dyn CompletionClient>>,
    persist: Option<Arc<dyn PersistentCache>>,
    render: Option<Arc<dyn RenderSink>>,
    freshness: Option<Arc<dyn FreshnessSink>>,
    signals: Option<Arc<dyn SignalSink>>,
    learning: LearningMode,
    baseline: Option<Arc<BaselineStore>>,
    enrichments: Vec<Arc<dyn Enrichment>>,
    overrides: Vec<Arc<dyn DomainLoader>>,
    without: BTreeSet<Domain>,
}

impl DriverBuilder {
    pub fn fetchers(mut self, fetchers: LiveFetchers) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Append a generative rung; the first call adds provider A, the second B.
    pub fn generative(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.generative.push(client);
        self
    }

    pub fn persist(mut self, store: Arc<dyn PersistentCache>) -> Self {
        self.persist = Some(store);
        self
    }

    pub fn render(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.render = Some(sink);
        self
    }

    pub fn freshness(mut self, sink: Arc<dyn FreshnessSink>) -> Self {
        self.freshness = Some(sink);
        self
    }

    pub fn signals(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.signals = Some(sink);
        self
    }

    pub fn learning(mut self, learning: LearningMode) -> Self {
        self.learning = learning;
        self
    }

    pub fn baseline(mut self, store: Arc<BaselineStore>) -> Self {
        self.baseline = Some(store);
        self
    }

    pub fn enrichment(mut self, enrichment: Arc<dyn Enrichment>) -> Self {
        self.enrichments.push(enrichment);
        self
    }

    /// Replace the built-in ladder of `loader.domain()`.
    pub fn loader(mut self, loader: Arc<dyn DomainLoader>) -> Self {
        self.overrides.push(loader);
        self
    }

    /// Schedule `domain` without any fallback ladder.
    pub fn without_ladder(mut self, domain: Domain) -> Self {
        self.without.insert(domain);
        self
    }

    pub fn build(self) -> Driver {
        ensure_metrics_described();
        let cfg = self.config;
        let budget = Arc::new(DailyBudget::new(cfg.generative.daily_limit));
        let ctx = LadderContext {
            config: &cfg,
            generative: &self.generative,
            budget: &budget,
            persist: self.persist.as_ref(),
        };

        let mut loaders: BTreeMap<Domain, Arc<dyn DomainLoader>> = BTreeMap::new();
        for domain in Domain::ALL {
            if self.without.contains(&domain) {
                continue;
            }
            loaders.insert(domain, build_loader(domain, &ctx, &self.fetchers));
        }
        for l in self.overrides {
            loaders.insert(l.domain(), l);
        }

        let pipeline = self.fetchers.news.clone().map(|f| {
            NewsPipeline::new(f, cfg.pipeline_settings()).with_disabled_sources(cfg.disabled_sources.iter().cloned())
        });

        let baseline = self
            .baseline
            .unwrap_or_else(|| Arc::new(BaselineStore::new(cfg.baseline)));
        let mut engine = CorrelationEngine::new(baseline, self.learning, cfg.correlation_settings());
        for e in self.enrichments {
            engine = engine.with_enrichment(e);
        }

        let render: Arc<dyn RenderSink> = match self.render {
            Some(r) => r,
            None => Arc::new(NullSinks),
        };
        let freshness: Arc<dyn FreshnessSink> = match self.freshness {
            Some(f) => f,
            None => Arc::new(NullSinks),
        };
        let signals: Arc<dyn SignalSink> = match self.signals {
            Some(s) => s,
            None => Arc::new(NullSinks),
        };
        let shared = Shared {
            flash: FlashCache::new(cfg.flash),
            loaders,
            pipeline,
            engine,
            render,
            freshness,
            signals,
            ready: Mutex::new(BTreeSet::new()),
            config: cfg,
        };
        Driver {
            scheduler: GuardedScheduler::new(),
            shared: Arc::new(shared),
        }
    }
}

struct LadderContext<'a> {
    config: &'a IngestConfig,
    generative: &'a [Arc<dyn CompletionClient>],
    budget: &'a Arc<DailyBudget>,
    persist: Option<&'a Arc<dyn PersistentCache>>,
}

fn build_loader(domain: Domain, ctx: &LadderContext<'_>, f: &LiveFetchers) -> Arc<dyn DomainLoader> {
    match domain {
        Domain::Markets | Domain::Crypto | Domain::Sectors | Domain::Commodities => {
            Arc::new(ladder(domain, ctx, f.quotes.clone()))
        }
        Domain::Weather => Arc::new(ladder(domain, ctx, f.weather.clone())),
        Domain::MilitaryFlights | Domain::Vessels => Arc::new(ladder(domain, ctx, f.tracks.clone())),
        Domain::EconomicIndicators
        | Domain::TradePolicy
        | Domain::SupplyChain
        | Domain::NaturalResources
        | Domain::Population => Arc::new(ladder(domain, ctx, f.indicators.clone())),
        Domain::Protests
        | Domain::Conflicts
        | Domain::CyberThreats
        | Domain::HungerZones
        | Domain::Fires
        | Domain::Outages
        | Domain::Earthquakes => Arc::new(ladder(domain, ctx, f.incidents.clone())),
    }
}

fn ladder<T: LayerItem>(
    domain: Domain,
    ctx: &LadderContext<'_>,
    live: Option<Arc<dyn SourceFetcher<T>>>,
) -> FallbackLadder<T> {
    let policy = ctx.config.ladder_policy(domain);
    let mut b = FallbackLadder::<T>::builder(domain).policy(policy);
    if let Some(fetcher) = live {
        b = b.live(fetcher);
    }
    for client in ctx.generative {
        let provider = GenerativeProvider::<T>::new(Arc::clone(client), domain, policy.generative_timeout)
            .with_budget(Arc::clone(ctx.budget));
        b = b.provider(Arc::new(provider));
    }
    if let Some(store) = ctx.persist {
        b = b.persist(Arc::clone(store));
    }
    b.fallback(T::from_layer(statics::dataset(domain)).unwrap_or_default())
        .build()
}
