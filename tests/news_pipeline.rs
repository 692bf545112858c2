// tests/news_pipeline.rs
mod common;

use chrono::{TimeZone, Utc};
use common::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use situation_ingest::ingest::rss::RssFeedFetcher;
use situation_ingest::ingest::{BatchObserver, CategoryStatus, NewsPipeline, NoopObserver, PipelineSettings};
use situation_ingest::{Driver, IngestConfig, LiveFetchers, NewsItem, NewsUpdate, SiteVariant};

/// Observer recording when each batch was flushed and how big it was.
#[derive(Default)]
struct TimedObserver {
    flushes: Mutex<Vec<(Instant, usize)>>,
}

impl BatchObserver for TimedObserver {
    fn on_batch(&self, _category: &str, items: &[NewsItem]) {
        self.flushes.lock().push((Instant::now(), items.len()));
    }
}

fn item(feed: &str, n: u32) -> NewsItem {
    news_item(
        feed,
        &format!("{feed} headline {n}"),
        &format!("https://news.example.com/{feed}/{n}"),
        Utc.with_ymd_and_hms(2026, 10, 14, 8, n, 0).unwrap(),
    )
}

fn settings(concurrency: usize) -> PipelineSettings {
    PipelineSettings {
        concurrency,
        ..PipelineSettings::default()
    }
}

#[tokio::test]
async fn fully_disabled_category_makes_no_requests() {
    let feeds = Arc::new(ScriptedFeeds::default());
    let pipeline = NewsPipeline::new(feeds.clone(), settings(5))
        .with_disabled_sources(vec!["Reuters".to_string(), "AP".to_string()]);

    let res = pipeline
        .fetch_category(&category("politics", &["Reuters", "AP"]), &NoopObserver)
        .await;
    assert_eq!(res.status, CategoryStatus::Disabled);
    assert_eq!(res.feeds_fetched, 0);
    assert!(res.items.is_empty());
    assert!(feeds.requested().is_empty());
}

#[tokio::test]
async fn politics_with_two_disabled_fetches_three() {
    let mut scripted = ScriptedFeeds::default();
    for f in ["Reuters", "AP", "BBC", "Guardian", "Politico"] {
        scripted.items.insert(f.to_string(), vec![item(f, 1)]);
    }
    let feeds = Arc::new(scripted);
    let pipeline = NewsPipeline::new(feeds.clone(), settings(5))
        .with_disabled_sources(vec!["AP".to_string(), "Politico".to_string()]);

    let res = pipeline
        .fetch_category(
            &category("politics", &["Reuters", "AP", "BBC", "Guardian", "Politico"]),
            &NoopObserver,
        )
        .await;

    let mut requested = feeds.requested();
    requested.sort();
    assert_eq!(requested, vec!["BBC", "Guardian", "Reuters"]);
    assert_eq!(res.feeds_fetched, 3);
    assert_eq!(res.items.len(), 3);
    assert_eq!(res.status, CategoryStatus::Ok);
    assert!(res.items.iter().all(|i| i.category == "politics"));
}

#[tokio::test(start_paused = true)]
async fn categories_run_in_sequential_chunks() {
    let mut scripted = ScriptedFeeds::default();
    let names: Vec<String> = (0..7).map(|i| format!("feed{i}")).collect();
    for (i, n) in names.iter().enumerate() {
        scripted.items.insert(n.clone(), vec![item(n, i as u32)]);
        // Later feeds are faster, so only chunking keeps them waiting.
        scripted
            .delays
            .insert(n.clone(), Duration::from_millis(700 - 100 * i as u64));
    }
    let feeds = Arc::new(scripted);
    let cats: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, n)| category(&format!("cat{i}"), &[n.as_str()]))
        .collect();

    let pipeline = NewsPipeline::new(feeds.clone(), settings(3));
    let results = pipeline.fetch_categories(&cats, &NoopObserver).await;

    let order: Vec<_> = results.iter().map(|r| r.category.clone()).collect();
    assert_eq!(order, (0..7).map(|i| format!("cat{i}")).collect::<Vec<_>>());

    let requested = feeds.requested();
    let chunk = |r: std::ops::Range<usize>| -> HashSet<String> { requested[r].iter().cloned().collect() };
    let expect = |ids: &[usize]| -> HashSet<String> { ids.iter().map(|i| format!("feed{i}")).collect() };
    assert_eq!(chunk(0..3), expect(&[0, 1, 2]));
    assert_eq!(chunk(3..6), expect(&[3, 4, 5]));
    assert_eq!(chunk(6..7), expect(&[6]));
}

#[test]
fn constrained_variants_lower_the_cap() {
    let mut cfg = IngestConfig::default();
    assert_eq!(cfg.pipeline_settings().concurrency, 5);
    cfg.variant = SiteVariant::Tech;
    assert_eq!(cfg.pipeline_settings().concurrency, 3);
    cfg.news.constrained = Some(false);
    assert_eq!(cfg.pipeline_settings().concurrency, 5);
}

#[tokio::test(start_paused = true)]
async fn flushes_are_spaced_and_last_batch_survives() {
    let mut scripted = ScriptedFeeds::default();
    let delays = [0u64, 30, 60, 90, 250];
    for (i, d) in delays.iter().enumerate() {
        let name = format!("f{i}");
        scripted.items.insert(name.clone(), vec![item(&name, i as u32)]);
        scripted.delays.insert(name, Duration::from_millis(*d));
    }
    let feeds = Arc::new(scripted);
    let pipeline = NewsPipeline::new(feeds, settings(5));
    let observer = TimedObserver::default();
    let started = Instant::now();

    let res = pipeline
        .fetch_category(&category("world", &["f0", "f1", "f2", "f3", "f4"]), &observer)
        .await;
    assert_eq!(res.items.len(), 5);

    let flushes = observer.flushes.lock().clone();
    let at: Vec<u128> = flushes.iter().map(|(t, _)| (*t - started).as_millis()).collect();
    let sizes: Vec<usize> = flushes.iter().map(|(_, n)| *n).collect();
    assert_eq!(at, vec![0, 100, 250]);
    assert_eq!(sizes, vec![1, 4, 5]);
    for w in flushes.windows(2) {
        assert!(w[1].0 - w[0].0 >= Duration::from_millis(100));
    }
}

#[tokio::test(start_paused = true)]
async fn pending_batch_is_flushed_after_the_stream_ends() {
    let mut scripted = ScriptedFeeds::default();
    scripted.items.insert("a".into(), vec![item("a", 1)]);
    scripted.items.insert("b".into(), vec![item("b", 2)]);
    scripted.delays.insert("b".into(), Duration::from_millis(20));
    let pipeline = NewsPipeline::new(Arc::new(scripted), settings(5));
    let observer = TimedObserver::default();
    let started = Instant::now();

    pipeline
        .fetch_category(&category("world", &["a", "b"]), &observer)
        .await;

    let flushes = observer.flushes.lock().clone();
    assert_eq!(flushes.len(), 2);
    assert_eq!(flushes[1].1, 2);
    assert_eq!((flushes[1].0 - started).as_millis(), 100);
}

#[tokio::test]
async fn failed_feeds_and_duplicates() {
    let mut scripted = ScriptedFeeds::default();
    let shared_item = item("wire", 5);
    scripted.items.insert("a".into(), vec![shared_item.clone(), item("a", 1)]);
    scripted.items.insert("b".into(), vec![shared_item]);
    scripted.failing = vec!["c".into()];
    let pipeline = NewsPipeline::new(Arc::new(scripted), settings(5));

    let res = pipeline
        .fetch_category(&category("world", &["a", "b", "c"]), &NoopObserver)
        .await;
    assert_eq!(res.status, CategoryStatus::Ok);
    assert_eq!(res.items.len(), 2);
    assert_eq!(res.feed_errors.len(), 1);
    assert_eq!(res.feed_errors[0].0, "c");
    // newest first
    assert!(res.items[0].published_at >= res.items[1].published_at);

    let mut only_failing = ScriptedFeeds::default();
    only_failing.failing = vec!["c".into()];
    let res = NewsPipeline::new(Arc::new(only_failing), settings(5))
        .fetch_category(&category("world", &["c"]), &NoopObserver)
        .await;
    assert_eq!(res.status, CategoryStatus::Failed { failed_feeds: 1 });
}

#[test]
fn rss_fixture_parses_into_items() {
    let xml = include_str!("fixtures/world_rss.xml");
    let fetcher = RssFeedFetcher::new(Duration::from_secs(5)).unwrap();
    let items = fetcher.parse(xml, "World Desk", "world", Utc::now()).unwrap();

    assert_eq!(items.len(), 4);
    assert!(items[0].is_alert);
    assert!(items[0].location.is_some());
    assert_eq!(items[1].title, "Ceasefire talks resume in Doha - delegations arrive");
    assert_eq!(items[2].title, "Port strike enters third day in Rotterdam");
    assert_eq!(
        items[0].published_at,
        Utc.with_ymd_and_hms(2026, 10, 14, 8, 30, 0).unwrap()
    );
}

#[test]
fn default_config_fetcher_still_flags_alerts() {
    let xml = include_str!("fixtures/world_rss.xml");
    let cfg = IngestConfig::default();
    assert!(cfg.keywords.is_empty());

    let fetcher = RssFeedFetcher::from_config(&cfg).unwrap();
    let items = fetcher.parse(xml, "World Desk", "world", Utc::now()).unwrap();
    let alerts: Vec<_> = items.iter().filter(|i| i.is_alert).collect();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].location.is_some());

    let tuned = IngestConfig {
        keywords: vec!["strike".to_string()],
        ..IngestConfig::default()
    };
    let items = RssFeedFetcher::from_config(&tuned)
        .unwrap()
        .parse(xml, "World Desk", "world", Utc::now())
        .unwrap();
    assert_eq!(items.iter().filter(|i| i.is_alert).count(), 2);
}

#[tokio::test]
async fn driver_pushes_partial_then_final_and_flashes_alerts() {
    let mut scripted = ScriptedFeeds::default();
    let mut alert = item("Wire", 1);
    alert.is_alert = true;
    alert.location = Some(situation_ingest::model::GeoPoint { lat: 49.99, lon: 36.23 });
    scripted.items.insert("Wire".into(), vec![alert, item("Wire", 2)]);
    scripted.failing = vec!["Down".into()];

    let mut cfg = config_with(&[]);
    cfg.news.categories = vec![category("world", &["Wire"]), category("tech", &["Down"])];
    let render = Arc::new(RecordingRender::default());
    let freshness = Arc::new(RecordingFreshness::default());
    let driver = Driver::builder(cfg)
        .fetchers(LiveFetchers {
            news: Some(Arc::new(scripted)),
            ..LiveFetchers::default()
        })
        .render(render.clone())
        .freshness(freshness.clone())
        .build();

    driver.load_all().await;
    let world = render.news("world");
    assert!(world.len() >= 2);
    assert_eq!(world[0].1, NewsUpdate::Partial);
    assert_eq!(world.last(), Some(&(2, NewsUpdate::Final(CategoryStatus::Ok))));
    assert_eq!(
        render.news("tech").last(),
        Some(&(0, NewsUpdate::Final(CategoryStatus::Failed { failed_feeds: 1 })))
    );
    assert_eq!(render.highlights(), vec!["Wire headline 1".to_string()]);
    assert_eq!(freshness.updates.lock().clone(), vec![("news".to_string(), 2)]);

    // Same alert again inside the cooldown: no second highlight.
    driver.load_all().await;
    assert_eq!(render.highlights().len(), 1);
}
