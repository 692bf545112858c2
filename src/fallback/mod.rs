// src/fallback/mod.rs
//! Per-domain fallback ladder.
//!
//! A ladder is data: an ordered list of providers sharing one signature,
//! `(domain) -> Result<Vec<T>, IngestError>`, evaluated by a single
//! try-next-on-failure driver. The last resort is an embedded static dataset,
//! so a domain with a ladder is never left empty.
//!
//! Order of evaluation:
//! 1. live fetch (with the domain's retry policy, if any)
//! 2. generative provider A, then B
//! 3. last-known-good payload from the persistent cache
//! 4. static dataset

pub mod generative;
pub mod statics;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheHit, DomainCache};
use crate::error::IngestError;
use crate::model::{Domain, FetchOutcome, LayerData, LayerItem};
use crate::persist::PersistentCache;

/// Live upstream for one record type; a single fetcher may serve several
/// domains.
#[async_trait]
pub trait SourceFetcher<T>: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, domain: Domain) -> anyhow::Result<FetchOutcome<T>>;
}

/// Uniform rung signature.
#[async_trait]
pub trait LadderProvider<T>: Send + Sync {
    fn name(&self) -> &str;
    fn rung(&self) -> RungKind;
    async fn provide(
        &self,
        domain: Domain,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RungKind {
    Live,
    Generative,
}

/// Which step of the ladder produced a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderSource {
    Live,
    Generative,
    Persisted,
    Static,
    /// Every step failed and the static dataset is empty.
    Exhausted,
}

impl LadderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LadderSource::Live => "live",
            LadderSource::Generative => "generative",
            LadderSource::Persisted => "persisted",
            LadderSource::Static => "static",
            LadderSource::Exhausted => "exhausted",
        }
    }

    /// Lifetime of a cached result from this step. Only upstream-derived
    /// results occupy the slot; placeholder data must not hide a recovered
    /// upstream for a whole TTL.
    pub fn cache_ttl(&self, policy: &LadderPolicy) -> Option<Duration> {
        match self {
            LadderSource::Live => Some(policy.cache_ttl),
            LadderSource::Generative => Some(policy.generative_ttl),
            _ => None,
        }
    }
}

impl From<RungKind> for LadderSource {
    fn from(k: RungKind) -> Self {
        match k {
            RungKind::Live => LadderSource::Live,
            RungKind::Generative => LadderSource::Generative,
        }
    }
}

/// Fixed number of attempts with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(rename = "backoff_secs", with = "secs")]
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    fn retries(&self, err: &IngestError) -> bool {
        !matches!(err, IngestError::RateLimited | IngestError::ParseFailure(_))
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Bounds on how long a generated dataset is served from cache.
pub const GENERATIVE_TTL_MIN: Duration = Duration::from_secs(10 * 60);
pub const GENERATIVE_TTL_MAX: Duration = Duration::from_secs(15 * 60);

/// Timing and retry knobs for one domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderPolicy {
    /// Lifetime of a live result.
    pub cache_ttl: Duration,
    /// Lifetime of a generated result, always within
    /// [`GENERATIVE_TTL_MIN`]..=[`GENERATIVE_TTL_MAX`].
    pub generative_ttl: Duration,
    pub fetch_timeout: Duration,
    pub generative_timeout: Duration,
    pub retry: Option<RetryPolicy>,
    /// Oldest persisted payload still preferred over the static dataset.
    pub persisted_max_age: Duration,
}

impl LadderPolicy {
    /// Built-in per-domain defaults.
    pub fn default_for(domain: Domain) -> Self {
        let mins = |m: u64| Duration::from_secs(m * 60);
        let secs = Duration::from_secs;
        let (ttl, gen_timeout, retry) = match domain {
            Domain::Markets | Domain::Sectors => (mins(5), secs(15), None),
            Domain::Crypto => (mins(10), secs(15), None),
            Domain::Commodities => (mins(10), secs(15), None),
            Domain::Weather => (mins(10), secs(12), None),
            Domain::Protests => (mins(15), secs(20), Some(RetryPolicy::new(2, secs(15)))),
            Domain::Conflicts => (mins(15), secs(20), None),
            Domain::MilitaryFlights => (mins(5), secs(20), Some(RetryPolicy::new(3, secs(15)))),
            Domain::Vessels => (mins(5), secs(20), Some(RetryPolicy::new(3, secs(20)))),
            Domain::CyberThreats => (mins(15), secs(20), None),
            Domain::Fires | Domain::Outages | Domain::Earthquakes => (mins(10), secs(15), None),
            Domain::HungerZones | Domain::NaturalResources | Domain::Population => {
                (mins(60), secs(30), None)
            }
            Domain::TradePolicy | Domain::SupplyChain | Domain::EconomicIndicators => {
                (mins(30), secs(25), None)
            }
        };
        Self {
            cache_ttl: ttl,
            generative_ttl: clamp_generative_ttl(ttl),
            fetch_timeout: secs(20),
            generative_timeout: gen_timeout,
            retry,
            persisted_max_age: Duration::from_secs(24 * 3600),
        }
    }
}

pub fn clamp_generative_ttl(ttl: Duration) -> Duration {
    ttl.clamp(GENERATIVE_TTL_MIN, GENERATIVE_TTL_MAX)
}

/// Result of one ladder evaluation.
#[derive(Debug, Clone)]
pub struct LadderOutcome<T> {
    pub domain: Domain,
    pub items: Vec<T>,
    pub source: LadderSource,
    /// Provider that produced `items` ("static" / "persisted" for the tail).
    pub provider: String,
    /// Failures of the steps tried before `provider`, in order.
    pub errors: Vec<(String, IngestError)>,
}

/// Live rung: applies the fetch timeout and the domain's retry policy.
pub struct LiveProvider<T> {
    fetcher: Arc<dyn SourceFetcher<T>>,
    timeout: Duration,
    retry: Option<RetryPolicy>,
}

impl<T> LiveProvider<T> {
    pub fn new(fetcher: Arc<dyn SourceFetcher<T>>, policy: &LadderPolicy) -> Self {
        Self {
            fetcher,
            timeout: policy.fetch_timeout,
            retry: policy.retry,
        }
    }

    async fn attempt(&self, domain: Domain) -> Result<Vec<T>, IngestError> {
        let outcome = match tokio::time::timeout(self.timeout, self.fetcher.fetch(domain)).await {
            Err(_) => return Err(IngestError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(IngestError::classify(&e)),
            Ok(Ok(o)) => o,
        };
        if outcome.rate_limited {
            return Err(IngestError::RateLimited);
        }
        if outcome.upstream_unavailable {
            return Err(IngestError::UpstreamUnavailable(self.fetcher.name().to_string()));
        }
        if outcome.skipped {
            return Err(IngestError::UpstreamUnavailable(format!(
                "{} skipped the request",
                self.fetcher.name()
            )));
        }
        if outcome.items.is_empty() {
            return Err(IngestError::EmptyResult);
        }
        Ok(outcome.items)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> LadderProvider<T> for LiveProvider<T> {
    fn name(&self) -> &str {
        self.fetcher.name()
    }

    fn rung(&self) -> RungKind {
        RungKind::Live
    }

    async fn provide(
        &self,
        domain: Domain,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, IngestError> {
        let attempts = self.retry.map(|r| r.attempts.max(1)).unwrap_or(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(domain).await {
                Ok(items) => return Ok(items),
                Err(e) => e,
            };
            let Some(retry) = self.retry else {
                return Err(err);
            };
            if attempt >= attempts || !retry.retries(&err) {
                return Err(err);
            }
            tracing::info!(
                target: "fallback",
                %domain,
                provider = self.name(),
                attempt,
                error = %err,
                backoff_secs = retry.backoff.as_secs(),
                "live fetch failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(retry.backoff) => {}
            }
        }
    }
}

struct LadderCore<T> {
    domain: Domain,
    policy: LadderPolicy,
    rungs: Vec<Arc<dyn LadderProvider<T>>>,
    fallback: Vec<T>,
    persist: Option<Arc<dyn PersistentCache>>,
}

/// Ordered providers for one domain plus its cache slot.
pub struct FallbackLadder<T> {
    core: Arc<LadderCore<T>>,
    cache: DomainCache<LadderOutcome<T>, Infallible>,
}

impl<T: LayerItem> FallbackLadder<T> {
    pub fn builder(domain: Domain) -> LadderBuilder<T> {
        LadderBuilder {
            domain,
            policy: LadderPolicy::default_for(domain),
            rungs: Vec::new(),
            fallback: Vec::new(),
            persist: None,
        }
    }

    pub fn domain(&self) -> Domain {
        self.core.domain
    }

    pub fn policy(&self) -> &LadderPolicy {
        &self.core.policy
    }

    pub fn static_dataset(&self) -> &[T] {
        &self.core.fallback
    }

    /// Evaluate the ladder, serving a fresh cached result or joining an
    /// in-flight evaluation when possible. Never fails.
    pub async fn get(&self, cancel: &CancellationToken) -> (LadderOutcome<T>, CacheHit) {
        let core = Arc::clone(&self.core);
        let policy = self.core.policy;
        let cancel = cancel.clone();
        let (res, hit) = self
            .cache
            .get_or_fetch_with_ttl(
                move || async move { Ok::<_, Infallible>(core.evaluate(&cancel).await) },
                move |o: &LadderOutcome<T>| o.source.cache_ttl(&policy),
            )
            .await;
        match res {
            Ok(outcome) => (outcome, hit),
            Err(never) => match never {},
        }
    }
}

impl<T: LayerItem> LadderCore<T> {
    fn persist_key(&self) -> String {
        format!("layer:{}", self.domain)
    }

    async fn evaluate(&self, cancel: &CancellationToken) -> LadderOutcome<T> {
        let domain = self.domain;
        let mut errors = Vec::new();

        for rung in &self.rungs {
            if cancel.is_cancelled() {
                tracing::debug!(target: "fallback", %domain, "cancelled, skipping upstream rungs");
                break;
            }
            let name = rung.name().to_string();
            let kind = rung.rung();
            match rung.provide(domain, cancel).await {
                Ok(items) if !items.is_empty() => {
                    record_rung(domain, kind_label(kind), "ok");
                    tracing::debug!(target: "fallback", %domain, provider = %name, count = items.len(), "rung succeeded");
                    self.remember(&items).await;
                    return LadderOutcome {
                        domain,
                        items,
                        source: kind.into(),
                        provider: name,
                        errors,
                    };
                }
                Ok(_) => {
                    record_rung(domain, kind_label(kind), IngestError::EmptyResult.kind());
                    errors.push((name, IngestError::EmptyResult));
                }
                Err(e) => {
                    record_rung(domain, kind_label(kind), e.kind());
                    tracing::warn!(target: "fallback", %domain, provider = %name, error = %e, "rung failed, advancing");
                    errors.push((name, e));
                }
            }
        }

        if let Some(items) = self.last_known_good().await {
            record_rung(domain, "persisted", "ok");
            return LadderOutcome {
                domain,
                items,
                source: LadderSource::Persisted,
                provider: "persisted".to_string(),
                errors,
            };
        }

        let source = if self.fallback.is_empty() {
            tracing::error!(target: "fallback", %domain, "ladder exhausted with no static dataset");
            LadderSource::Exhausted
        } else {
            tracing::info!(target: "fallback", %domain, count = self.fallback.len(), "serving static dataset");
            LadderSource::Static
        };
        record_rung(domain, "static", source.as_str());
        LadderOutcome {
            domain,
            items: self.fallback.clone(),
            source,
            provider: "static".to_string(),
            errors,
        }
    }

    /// Persist an upstream result; failures are logged and swallowed.
    async fn remember(&self, items: &[T]) {
        let Some(store) = &self.persist else {
            return;
        };
        let value = match serde_json::to_value(items) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "fallback", domain = %self.domain, error = %e, "cannot serialize layer for persistence");
                return;
            }
        };
        if let Err(e) = store.set(&self.persist_key(), value).await {
            tracing::warn!(target: "fallback", domain = %self.domain, error = %format!("{e:#}"), "persistent cache set failed");
        }
    }

    async fn last_known_good(&self) -> Option<Vec<T>> {
        let store = self.persist.as_ref()?;
        let entry = match store.get(&self.persist_key()).await {
            Ok(Some(e)) => e,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(target: "fallback", domain = %self.domain, error = %format!("{e:#}"), "persistent cache get failed");
                return None;
            }
        };
        let age = Utc::now().signed_duration_since(entry.updated_at);
        if age.to_std().map_or(true, |a| a > self.policy.persisted_max_age) {
            return None;
        }
        let items: Vec<T> = serde_json::from_value(entry.data).ok()?;
        (!items.is_empty()).then_some(items)
    }
}

fn kind_label(k: RungKind) -> &'static str {
    match k {
        RungKind::Live => "live",
        RungKind::Generative => "generative",
    }
}

fn record_rung(domain: Domain, rung: &'static str, outcome: &'static str) {
    counter!(
        "fallback_rung_total",
        "domain" => domain.as_str(),
        "rung" => rung,
        "outcome" => outcome
    )
    .increment(1);
}

enum RungSpec<T> {
    Live(Arc<dyn SourceFetcher<T>>),
    Provider(Arc<dyn LadderProvider<T>>),
}

/// Rungs are evaluated in the order they are added. Live rungs take the
/// policy in effect at [`build`](LadderBuilder::build) time.
pub struct LadderBuilder<T> {
    domain: Domain,
    policy: LadderPolicy,
    rungs: Vec<RungSpec<T>>,
    fallback: Vec<T>,
    persist: Option<Arc<dyn PersistentCache>>,
}

impl<T: LayerItem> LadderBuilder<T> {
    pub fn policy(mut self, policy: LadderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn live(mut self, fetcher: Arc<dyn SourceFetcher<T>>) -> Self {
        self.rungs.push(RungSpec::Live(fetcher));
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LadderProvider<T>>) -> Self {
        self.rungs.push(RungSpec::Provider(provider));
        self
    }

    pub fn fallback(mut self, items: Vec<T>) -> Self {
        self.fallback = items;
        self
    }

    pub fn persist(mut self, store: Arc<dyn PersistentCache>) -> Self {
        self.persist = Some(store);
        self
    }

    pub fn build(self) -> FallbackLadder<T> {
        if self.fallback.is_empty() {
            tracing::warn!(target: "fallback", domain = %self.domain, "ladder built without a static dataset");
        }
        let policy = self.policy;
        let rungs = self
            .rungs
            .into_iter()
            .map(|r| match r {
                RungSpec::Live(fetcher) => {
                    Arc::new(LiveProvider::new(fetcher, &policy)) as Arc<dyn LadderProvider<T>>
                }
                RungSpec::Provider(p) => p,
            })
            .collect();
        let cache = DomainCache::new(self.domain.as_str(), policy.cache_ttl);
        FallbackLadder {
            core: Arc::new(LadderCore {
                domain: self.domain,
                policy,
                rungs,
                fallback: self.fallback,
                persist: self.persist,
            }),
            cache,
        }
    }
}

/// Type-erased ladder result handed to the orchestration driver.
#[derive(Debug, Clone)]
pub struct LayerLoad {
    pub domain: Domain,
    pub data: LayerData,
    pub source: LadderSource,
    pub provider: String,
    pub errors: Vec<(String, IngestError)>,
    pub cache: CacheHit,
}

/// Object-safe view of a [`FallbackLadder`] regardless of record type.
#[async_trait]
pub trait DomainLoader: Send + Sync {
    fn domain(&self) -> Domain;
    async fn load(&self, cancel: &CancellationToken) -> LayerLoad;
    /// The embedded static dataset, `None` when the ladder has none.
    fn static_layer(&self) -> Option<LayerData>;
}

#[async_trait]
impl<T: LayerItem> DomainLoader for FallbackLadder<T> {
    fn domain(&self) -> Domain {
        self.core.domain
    }

    async fn load(&self, cancel: &CancellationToken) -> LayerLoad {
        let (outcome, cache) = self.get(cancel).await;
        LayerLoad {
            domain: outcome.domain,
            data: T::into_layer(outcome.items),
            source: outcome.source,
            provider: outcome.provider,
            errors: outcome.errors,
            cache,
        }
    }

    fn static_layer(&self) -> Option<LayerData> {
        if self.core.fallback.is_empty() {
            None
        } else {
            Some(T::into_layer(self.core.fallback.clone()))
        }
    }
}
