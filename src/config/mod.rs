// src/config/mod.rs
//! Ingest configuration, loaded from TOML or JSON.
//!
//! Lookup order:
//! 1) `$INGEST_CONFIG_PATH` (error if it points nowhere)
//! 2) `config/ingest.toml`
//! 3) `config/ingest.json`
//! 4) built-in defaults

pub mod generative;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::baseline::BaselineParams;
use crate::correlation::geo::ConvergenceParams;
use crate::correlation::military::{default_regions, Region};
use crate::correlation::CorrelationSettings;
use crate::fallback::{clamp_generative_ttl, LadderPolicy, RetryPolicy};
use crate::flash::FlashConfig;
use crate::ingest::{NewsCategory, PipelineSettings};
use crate::model::{Domain, SiteVariant};
pub use generative::{GenerativeConfig, ProviderConfig, ResolvedProvider};

pub const ENV_PATH: &str = "INGEST_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub concurrency: usize,
    pub constrained_concurrency: usize,
    /// Forces the constrained cap; `None` lets the site variant decide.
    pub constrained: Option<bool>,
    pub flush_interval_ms: u64,
    pub feed_timeout_secs: u64,
    pub feed_concurrency: usize,
    pub categories: Vec<NewsCategory>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            constrained_concurrency: 3,
            constrained: None,
            flush_interval_ms: 100,
            feed_timeout_secs: 20,
            feed_concurrency: 6,
            categories: Vec::new(),
        }
    }
}

/// Per-domain override of the built-in ladder policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOverride {
    pub cache_ttl_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub generative_timeout_secs: Option<u64>,
    /// Clamped to the 10 to 15 minute generative window.
    pub generative_ttl_secs: Option<u64>,
    pub persisted_max_age_secs: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub variant: SiteVariant,
    /// Domain name -> enabled. Absent domains follow the variant default.
    pub enabled_layers: BTreeMap<String, bool>,
    #[serde(deserialize_with = "clean_set")]
    pub disabled_sources: BTreeSet<String>,
    pub news: NewsConfig,
    pub convergence: ConvergenceParams,
    pub baseline: BaselineParams,
    pub flash: FlashConfig,
    pub domains: BTreeMap<String, DomainOverride>,
    pub keywords: Vec<String>,
    pub regions: Vec<Region>,
    pub generative: GenerativeConfig,
    /// Directory for last-known-good payloads; none keeps them in memory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            variant: SiteVariant::default(),
            enabled_layers: BTreeMap::new(),
            disabled_sources: BTreeSet::new(),
            news: NewsConfig::default(),
            convergence: ConvergenceParams::default(),
            baseline: BaselineParams::default(),
            flash: FlashConfig::default(),
            domains: BTreeMap::new(),
            keywords: Vec::new(),
            regions: default_regions(),
            generative: GenerativeConfig::default(),
            cache_dir: None,
        }
    }
}

fn clean_set<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<BTreeSet<String>, D::Error> {
    let raw = Vec::<String>::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl IngestConfig {
    /// Load from an explicit path; the extension picks the format.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, &ext).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path {}", pb.display()));
        }
        for candidate in ["config/ingest.toml", "config/ingest.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Ok(Self::default())
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let cfg: Self = match hint_ext {
            "json" => serde_json::from_str(s)?,
            "toml" => toml::from_str(s)?,
            _ => match serde_json::from_str(s) {
                Ok(v) => v,
                Err(_) => toml::from_str(s).map_err(|e| anyhow!("unsupported config format: {e}"))?,
            },
        };
        cfg.validate()
    }

    fn validate(self) -> Result<Self> {
        for key in self.enabled_layers.keys().chain(self.domains.keys()) {
            if Domain::parse(key).is_none() {
                return Err(anyhow!("unknown domain `{key}`"));
            }
        }
        Ok(self)
    }

    pub fn is_layer_enabled(&self, domain: Domain) -> bool {
        self.enabled_layers
            .iter()
            .find(|(k, _)| Domain::parse(k) == Some(domain))
            .map(|(_, v)| *v)
            .unwrap_or_else(|| self.variant.default_domains().contains(&domain))
    }

    /// Domains scheduled this cycle, in `Domain::ALL` order.
    pub fn scheduled_domains(&self) -> Vec<Domain> {
        Domain::ALL
            .into_iter()
            .filter(|d| self.is_layer_enabled(*d))
            .collect()
    }

    pub fn is_constrained(&self) -> bool {
        self.news.constrained.unwrap_or_else(|| self.variant.is_constrained())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let concurrency = if self.is_constrained() {
            self.news.constrained_concurrency
        } else {
            self.news.concurrency
        };
        PipelineSettings {
            concurrency: concurrency.max(1),
            feed_concurrency: self.news.feed_concurrency.max(1),
            feed_timeout: Duration::from_secs(self.news.feed_timeout_secs.max(1)),
            flush_interval: Duration::from_millis(self.news.flush_interval_ms),
        }
    }

    /// Built-in policy for `domain` with any configured overrides applied.
    pub fn ladder_policy(&self, domain: Domain) -> LadderPolicy {
        let mut policy = LadderPolicy::default_for(domain);
        let Some(o) = self
            .domains
            .iter()
            .find(|(k, _)| Domain::parse(k) == Some(domain))
            .map(|(_, v)| v)
        else {
            return policy;
        };
        if let Some(s) = o.cache_ttl_secs {
            policy.cache_ttl = Duration::from_secs(s);
        }
        if let Some(s) = o.fetch_timeout_secs {
            policy.fetch_timeout = Duration::from_secs(s.max(1));
        }
        if let Some(s) = o.generative_timeout_secs {
            policy.generative_timeout = Duration::from_secs(s.max(1));
        }
        if let Some(s) = o.generative_ttl_secs {
            policy.generative_ttl = clamp_generative_ttl(Duration::from_secs(s));
        }
        if let Some(s) = o.persisted_max_age_secs {
            policy.persisted_max_age = Duration::from_secs(s);
        }
        if o.retry.is_some() {
            policy.retry = o.retry;
        }
        policy
    }

    pub fn correlation_settings(&self) -> CorrelationSettings {
        CorrelationSettings {
            convergence: self.convergence,
            regions: self.regions.clone(),
            keywords: self.keywords.clone(),
        }
    }
}
