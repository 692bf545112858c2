// src/cache.rs
//! Per-domain TTL cache slot with in-flight request de-duplication.
//!
//! Invariants:
//! - an entry is only served while `now - timestamp < ttl`, where `ttl` is
//!   fixed per entry when it is stored;
//! - at most one upstream call per slot is outstanding; concurrent callers
//!   attach to the pending call and receive the same resolved value.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Cached value plus the instant it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self) -> bool {
        Instant::now().saturating_duration_since(self.timestamp) < self.ttl
    }
}

type Pending<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct SlotState<T, E> {
    entry: Option<CacheEntry<T>>,
    in_flight: Option<Pending<T, E>>,
}

/// Where a [`DomainCache::get_or_fetch`] result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    Fresh,
    Joined,
    Fetched,
}

pub struct DomainCache<T, E> {
    name: String,
    ttl: Duration,
    state: Mutex<SlotState<T, E>>,
}

impl<T, E> std::fmt::Debug for DomainCache<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<T, E> DomainCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            state: Mutex::new(SlotState {
                entry: None,
                in_flight: None,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value if it is still inside the TTL window.
    pub fn get_fresh(&self) -> Option<T> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .entry
            .as_ref()
            .filter(|e| e.is_fresh())
            .map(|e| e.data.clone())
    }

    pub fn put(&self, data: T) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.entry = Some(CacheEntry {
            data,
            timestamp: Instant::now(),
            ttl: self.ttl,
        });
    }

    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.entry = None;
    }

    /// Serve from cache, join a pending call, or start a new one.
    ///
    /// `store` decides whether a successful value is written to the slot
    /// (callers use it to keep placeholder data out of the cache).
    pub async fn get_or_fetch<F, Fut, S>(&self, fetch: F, store: S) -> (Result<T, E>, CacheHit)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        S: Fn(&T) -> bool,
    {
        let ttl = self.ttl;
        self.get_or_fetch_with_ttl(fetch, move |v| store(v).then_some(ttl))
            .await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), but `ttl_for` picks the
    /// lifetime of each stored value; `None` keeps it out of the slot.
    pub async fn get_or_fetch_with_ttl<F, Fut, S>(
        &self,
        fetch: F,
        ttl_for: S,
    ) -> (Result<T, E>, CacheHit)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        S: Fn(&T) -> Option<Duration>,
    {
        let (pending, hit) = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(e) = state.entry.as_ref() {
                if e.is_fresh() {
                    return (Ok(e.data.clone()), CacheHit::Fresh);
                }
            }
            match state.in_flight.as_ref() {
                Some(p) => (p.clone(), CacheHit::Joined),
                None => {
                    let p = fetch().boxed().shared();
                    state.in_flight = Some(p.clone());
                    (p, CacheHit::Fetched)
                }
            }
        };

        let result = pending.clone().await;

        // Whoever observes completion first retires the handle; a handle that
        // was already replaced is left alone.
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let is_current = state
            .in_flight
            .as_ref()
            .is_some_and(|cur| cur.ptr_eq(&pending));
        if is_current {
            state.in_flight = None;
            if let Ok(v) = &result {
                if let Some(ttl) = ttl_for(v) {
                    state.entry = Some(CacheEntry {
                        data: v.clone(),
                        timestamp: Instant::now(),
                        ttl,
                    });
                }
            }
            tracing::trace!(target: "cache", slot = %self.name, ok = result.is_ok(), "in-flight request settled");
        }
        (result, hit)
    }
}
