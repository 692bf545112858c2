// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod baseline;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod persist;
pub mod scheduler;

// Per-domain fallback ladders (live -> generative -> persisted -> static)
pub mod fallback;

// News pipeline and render gate
pub mod flash;
pub mod ingest;

// Cross-source correlation
pub mod correlation;

// Orchestration and outward interfaces
pub mod driver;
pub mod sinks;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::IngestConfig;
pub use crate::driver::{CycleReport, Driver, DriverBuilder, LiveFetchers, TaskReport};
pub use crate::error::IngestError;
pub use crate::fallback::{DomainLoader, FallbackLadder, LadderSource};
pub use crate::model::{Domain, LayerData, NewsItem, SiteVariant};
pub use crate::scheduler::{GuardedScheduler, SourceTask, TaskOutcome};
pub use crate::sinks::{FreshnessSink, NewsUpdate, RenderSink, SignalSink};
