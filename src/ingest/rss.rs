// src/ingest/rss.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use super::{normalize_text, FeedFetcher, FeedSource};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{GeoPoint, NewsItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// GeoRSS simple point, "lat lon".
    #[serde(rename = "georss:point", alias = "point")]
    point: Option<String>,
}

const DEFAULT_ALERT_TERMS: &[&str] = &[
    "breaking",
    "urgent",
    "explosion",
    "attack",
    "earthquake",
    "evacuat",
    "missile",
    "coup",
];

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), 0)
}

fn parse_point(s: &str) -> Option<GeoPoint> {
    let mut it = s.split_whitespace().map(str::parse::<f64>);
    let lat = it.next()?.ok()?;
    let lon = it.next()?.ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some(GeoPoint { lat, lon })
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// RSS 2.0 feed fetcher over HTTP.
pub struct RssFeedFetcher {
    client: reqwest::Client,
    alert_terms: Vec<String>,
}

impl RssFeedFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("situation-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(request_timeout)
            .build()
            .context("building rss http client")?;
        Ok(Self {
            client,
            alert_terms: DEFAULT_ALERT_TERMS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Fetcher with the configured feed timeout, flagging the configured
    /// keywords on top of the built-in alert vocabulary.
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Ok(Self::new(Duration::from_secs(config.news.feed_timeout_secs.max(1)))?
            .with_alert_terms(config.keywords.iter().cloned()))
    }

    /// Flag `terms` in addition to the built-in alert vocabulary.
    pub fn with_alert_terms(mut self, terms: impl IntoIterator<Item = String>) -> Self {
        for t in terms {
            let t = t.trim().to_lowercase();
            if !t.is_empty() && !self.alert_terms.contains(&t) {
                self.alert_terms.push(t);
            }
        }
        self
    }

    /// Parse an RSS document into news items. Items without a title are
    /// dropped; a missing or bad `pubDate` falls back to `now`.
    pub fn parse(&self, xml: &str, feed: &str, category: &str, now: DateTime<Utc>) -> Result<Vec<NewsItem>> {
        let t0 = std::time::Instant::now();
        let rss: Rss = from_str(&scrub_html_entities_for_xml(xml))
            .map_err(|e| IngestError::ParseFailure(format!("{feed}: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let lower = title.to_lowercase();
            out.push(NewsItem {
                source: feed.to_string(),
                is_alert: self.alert_terms.iter().any(|t| lower.contains(t.as_str())),
                title,
                link: it.link.unwrap_or_default().trim().to_string(),
                published_at: it.pub_date.as_deref().and_then(parse_pub_date).unwrap_or(now),
                category: category.to_string(),
                location: it.point.as_deref().and_then(parse_point),
            });
        }
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl FeedFetcher for RssFeedFetcher {
    async fn fetch_feed(&self, feed: &FeedSource, category: &str) -> Result<Vec<NewsItem>> {
        let resp = self
            .client
            .get(&feed.url)
            .send()
            .await
            .with_context(|| format!("GET {}", feed.url))?;
        if resp.status().as_u16() == 429 {
            return Err(IngestError::RateLimited.into());
        }
        if resp.status().is_server_error() {
            return Err(IngestError::UpstreamUnavailable(format!("{} returned {}", feed.name, resp.status())).into());
        }
        let body = resp
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("reading body of {}", feed.url))?;
        self.parse(&body, &feed.name, category, Utc::now())
    }
}
