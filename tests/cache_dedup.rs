// tests/cache_dedup.rs
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use situation_ingest::cache::{CacheHit, DomainCache};

async fn slow_value(calls: Arc<AtomicUsize>, value: u64) -> Result<u64, String> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(value)
}

#[tokio::test(start_paused = true)]
async fn ten_concurrent_callers_trigger_one_call() {
    let cache: DomainCache<u64, String> = DomainCache::new("markets", Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));

    let results = join_all((0..10u64).map(|i| {
        let calls = calls.clone();
        let cache = &cache;
        async move { cache.get_or_fetch(move || slow_value(calls, i), |_| true).await }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|(v, _)| *v == Ok(0)));
    let fetched = results.iter().filter(|(_, h)| *h == CacheHit::Fetched).count();
    let joined = results.iter().filter(|(_, h)| *h == CacheHit::Joined).count();
    assert_eq!((fetched, joined), (1, 9));
}

#[tokio::test(start_paused = true)]
async fn entry_expires_just_after_ttl() {
    let ttl = Duration::from_secs(300);
    let cache: DomainCache<u64, String> = DomainCache::new("crypto", ttl);
    let calls = Arc::new(AtomicUsize::new(0));

    let (v, _) = cache.get_or_fetch(|| slow_value(calls.clone(), 1), |_| true).await;
    assert_eq!(v, Ok(1));

    tokio::time::advance(ttl - Duration::from_millis(1)).await;
    let (v, hit) = cache.get_or_fetch(|| slow_value(calls.clone(), 2), |_| true).await;
    assert_eq!((v, hit), (Ok(1), CacheHit::Fresh));

    tokio::time::advance(Duration::from_millis(2)).await;
    let (v, hit) = cache.get_or_fetch(|| slow_value(calls.clone(), 3), |_| true).await;
    assert_eq!((v, hit), (Ok(3), CacheHit::Fetched));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_are_shared_but_not_cached() {
    let cache: DomainCache<u64, String> = DomainCache::new("weather", Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = |calls: Arc<AtomicUsize>| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err::<u64, _>("upstream down".to_string())
    };
    let (a, b) = tokio::join!(
        cache.get_or_fetch(|| failing(calls.clone()), |_| true),
        cache.get_or_fetch(|| failing(calls.clone()), |_| true),
    );
    assert_eq!(a.0, Err("upstream down".to_string()));
    assert_eq!(b.0, Err("upstream down".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (v, hit) = cache.get_or_fetch(|| slow_value(calls.clone(), 5), |_| true).await;
    assert_eq!((v, hit), (Ok(5), CacheHit::Fetched));
}
