// src/model.rs
//! Shared data types: domains, site variants, layer records and the common
//! geo-event shape fed into the correlation engine.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A named category of data with its own fallback ladder and cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Markets,
    Crypto,
    Sectors,
    Commodities,
    Weather,
    Protests,
    Conflicts,
    MilitaryFlights,
    Vessels,
    CyberThreats,
    HungerZones,
    NaturalResources,
    TradePolicy,
    SupplyChain,
    EconomicIndicators,
    Population,
    Fires,
    Outages,
    Earthquakes,
}

impl Domain {
    pub const ALL: [Domain; 19] = [
        Domain::Markets,
        Domain::Crypto,
        Domain::Sectors,
        Domain::Commodities,
        Domain::Weather,
        Domain::Protests,
        Domain::Conflicts,
        Domain::MilitaryFlights,
        Domain::Vessels,
        Domain::CyberThreats,
        Domain::HungerZones,
        Domain::NaturalResources,
        Domain::TradePolicy,
        Domain::SupplyChain,
        Domain::EconomicIndicators,
        Domain::Population,
        Domain::Fires,
        Domain::Outages,
        Domain::Earthquakes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Markets => "markets",
            Domain::Crypto => "crypto",
            Domain::Sectors => "sectors",
            Domain::Commodities => "commodities",
            Domain::Weather => "weather",
            Domain::Protests => "protests",
            Domain::Conflicts => "conflicts",
            Domain::MilitaryFlights => "military_flights",
            Domain::Vessels => "vessels",
            Domain::CyberThreats => "cyber_threats",
            Domain::HungerZones => "hunger_zones",
            Domain::NaturalResources => "natural_resources",
            Domain::TradePolicy => "trade_policy",
            Domain::SupplyChain => "supply_chain",
            Domain::EconomicIndicators => "economic_indicators",
            Domain::Population => "population",
            Domain::Fires => "fires",
            Domain::Outages => "outages",
            Domain::Earthquakes => "earthquakes",
        }
    }

    pub fn parse(s: &str) -> Option<Domain> {
        let s = s.trim().to_ascii_lowercase().replace('-', "_");
        Domain::ALL.into_iter().find(|d| d.as_str() == s)
    }

    /// Baseline metric name used when the domain's item count is tracked.
    /// Domains without a meaningful count series return `None`.
    pub fn count_metric(&self) -> Option<&'static str> {
        match self {
            Domain::MilitaryFlights => Some("military_flights"),
            Domain::Vessels => Some("vessels"),
            Domain::Fires => Some("satellite_fires"),
            Domain::Protests => Some("protests"),
            Domain::Outages => Some("outages"),
            Domain::Conflicts => Some("conflicts"),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which flavour of the dashboard is being fed; controls which domains are
/// scheduled at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteVariant {
    #[default]
    Full,
    Tech,
    Finance,
}

impl SiteVariant {
    /// Domains enabled by default for this variant.
    pub fn default_domains(&self) -> &'static [Domain] {
        match self {
            SiteVariant::Full => &[
                Domain::Markets,
                Domain::Crypto,
                Domain::Commodities,
                Domain::Weather,
                Domain::Protests,
                Domain::Conflicts,
                Domain::MilitaryFlights,
                Domain::Vessels,
                Domain::CyberThreats,
                Domain::HungerZones,
                Domain::NaturalResources,
                Domain::Population,
                Domain::Fires,
                Domain::Outages,
                Domain::Earthquakes,
            ],
            SiteVariant::Tech => &[
                Domain::Markets,
                Domain::Crypto,
                Domain::CyberThreats,
                Domain::Outages,
            ],
            SiteVariant::Finance => &[
                Domain::Markets,
                Domain::Crypto,
                Domain::Sectors,
                Domain::Commodities,
                Domain::EconomicIndicators,
                Domain::TradePolicy,
                Domain::SupplyChain,
            ],
        }
    }

    /// Constrained variants run the news pipeline with a lower concurrency cap.
    pub fn is_constrained(&self) -> bool {
        !matches!(self, SiteVariant::Full)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Market, crypto, sector or commodity quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub id: String,
    pub event: String,
    pub severity: String,
    pub headline: String,
    pub lat: f64,
    pub lon: f64,
}

/// Point incident: protest, conflict event, fire detection, outage, cyber
/// threat, hunger zone or earthquake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoIncident {
    pub id: String,
    pub title: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub magnitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Aircraft,
    Vessel,
}

/// Military aircraft or vessel position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilitaryTrack {
    pub id: String,
    pub callsign: String,
    pub kind: TrackKind,
    pub lat: f64,
    pub lon: f64,
    /// ISO country code of the operator.
    pub operator_country: String,
    pub observed_at: DateTime<Utc>,
    /// Vessel stopped broadcasting AIS.
    #[serde(default)]
    pub ais_gap: bool,
}

/// Economic, trade, supply-chain, resource or population indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: String,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub period: String,
}

/// Final or partial dataset pushed to the render layer for one domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum LayerData {
    Quotes(Vec<Quote>),
    Weather(Vec<WeatherAlert>),
    Incidents(Vec<GeoIncident>),
    Tracks(Vec<MilitaryTrack>),
    Indicators(Vec<Indicator>),
}

impl LayerData {
    pub fn len(&self) -> usize {
        match self {
            LayerData::Quotes(v) => v.len(),
            LayerData::Weather(v) => v.len(),
            LayerData::Incidents(v) => v.len(),
            LayerData::Tracks(v) => v.len(),
            LayerData::Indicators(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geo events derived from this layer, tagged with `source_type`.
    pub fn geo_events(&self, source_type: &str) -> Vec<GeoEvent> {
        match self {
            LayerData::Incidents(v) => v
                .iter()
                .map(|i| GeoEvent {
                    id: format!("{source_type}:{}", i.id),
                    lat: i.lat,
                    lon: i.lon,
                    kind: source_type.to_string(),
                    time: i.occurred_at,
                })
                .collect(),
            LayerData::Tracks(v) => v
                .iter()
                .map(|t| GeoEvent {
                    id: format!("{source_type}:{}", t.id),
                    lat: t.lat,
                    lon: t.lon,
                    kind: source_type.to_string(),
                    time: t.observed_at,
                })
                .collect(),
            LayerData::Quotes(_) | LayerData::Weather(_) | LayerData::Indicators(_) => Vec::new(),
        }
    }

    pub fn tracks(&self) -> &[MilitaryTrack] {
        match self {
            LayerData::Tracks(v) => v,
            _ => &[],
        }
    }
}

/// Record type that a domain's fallback ladder produces.
pub trait LayerItem:
    Clone + Send + Sync + Serialize + DeserializeOwned + fmt::Debug + 'static
{
    fn into_layer(items: Vec<Self>) -> LayerData;
    /// Inverse of [`into_layer`](Self::into_layer); `None` on a type mismatch.
    fn from_layer(layer: LayerData) -> Option<Vec<Self>>;
}

impl LayerItem for Quote {
    fn into_layer(items: Vec<Self>) -> LayerData {
        LayerData::Quotes(items)
    }

    fn from_layer(layer: LayerData) -> Option<Vec<Self>> {
        match layer {
            LayerData::Quotes(items) => Some(items),
            _ => None,
        }
    }
}

impl LayerItem for WeatherAlert {
    fn into_layer(items: Vec<Self>) -> LayerData {
        LayerData::Weather(items)
    }

    fn from_layer(layer: LayerData) -> Option<Vec<Self>> {
        match layer {
            LayerData::Weather(items) => Some(items),
            _ => None,
        }
    }
}

impl LayerItem for GeoIncident {
    fn into_layer(items: Vec<Self>) -> LayerData {
        LayerData::Incidents(items)
    }

    fn from_layer(layer: LayerData) -> Option<Vec<Self>> {
        match layer {
            LayerData::Incidents(items) => Some(items),
            _ => None,
        }
    }
}

impl LayerItem for MilitaryTrack {
    fn into_layer(items: Vec<Self>) -> LayerData {
        LayerData::Tracks(items)
    }

    fn from_layer(layer: LayerData) -> Option<Vec<Self>> {
        match layer {
            LayerData::Tracks(items) => Some(items),
            _ => None,
        }
    }
}

impl LayerItem for Indicator {
    fn into_layer(items: Vec<Self>) -> LayerData {
        LayerData::Indicators(items)
    }

    fn from_layer(layer: LayerData) -> Option<Vec<Self>> {
        match layer {
            LayerData::Indicators(items) => Some(items),
            _ => None,
        }
    }
}

/// Common shape ingested into the correlation engine's spatial window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEvent {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    /// Source type, e.g. "protests" or "military_flights".
    #[serde(rename = "type")]
    pub kind: String,
    pub time: DateTime<Utc>,
}

/// News headline produced by a feed fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Feed name the item came from.
    pub source: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    #[serde(default)]
    pub is_alert: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Raw result of a source fetcher (§6 shape).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub rate_limited: bool,
    pub skipped: bool,
    pub upstream_unavailable: bool,
}

impl<T> FetchOutcome<T> {
    pub fn items(items: Vec<T>) -> Self {
        Self {
            items,
            rate_limited: false,
            skipped: false,
            upstream_unavailable: false,
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            rate_limited: true,
            ..Self::items(Vec::new())
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::items(Vec::new())
        }
    }

    pub fn upstream_unavailable() -> Self {
        Self {
            upstream_unavailable: true,
            ..Self::items(Vec::new())
        }
    }
}
