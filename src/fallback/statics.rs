// src/fallback/statics.rs
//! Embedded last-resort datasets, one per domain.
//!
//! These are representative snapshots, not live data. They exist so a
//! domain is never rendered empty.

use chrono::{DateTime, Utc};

use crate::model::{
    Domain, GeoIncident, Indicator, LayerData, MilitaryTrack, Quote, TrackKind, WeatherAlert,
};

/// Reference instant stamped on static incidents and tracks.
const SNAPSHOT_TS: i64 = 1_735_689_600; // 2025-01-01T00:00:00Z

fn snapshot_time() -> DateTime<Utc> {
    DateTime::from_timestamp(SNAPSHOT_TS, 0).unwrap_or_default()
}

fn q(symbol: &str, name: &str, price: f64, change_pct: f64) -> Quote {
    Quote {
        symbol: symbol.into(),
        name: name.into(),
        price,
        change_pct,
    }
}

pub fn quotes(domain: Domain) -> Vec<Quote> {
    match domain {
        Domain::Markets => vec![
            q("^GSPC", "S&P 500", 5881.63, 0.0),
            q("^DJI", "Dow Jones", 42544.22, 0.0),
            q("^IXIC", "Nasdaq", 19310.79, 0.0),
            q("^FTSE", "FTSE 100", 8173.02, 0.0),
            q("^N225", "Nikkei 225", 39894.54, 0.0),
            q("^GDAXI", "DAX", 19909.14, 0.0),
        ],
        Domain::Crypto => vec![
            q("BTC", "Bitcoin", 93429.2, 0.0),
            q("ETH", "Ethereum", 3332.4, 0.0),
            q("SOL", "Solana", 189.3, 0.0),
            q("XRP", "XRP", 2.08, 0.0),
        ],
        Domain::Sectors => vec![
            q("XLK", "Technology", 232.52, 0.0),
            q("XLF", "Financials", 48.33, 0.0),
            q("XLE", "Energy", 85.66, 0.0),
            q("XLV", "Health Care", 137.56, 0.0),
            q("XLI", "Industrials", 131.83, 0.0),
            q("XLU", "Utilities", 75.71, 0.0),
        ],
        Domain::Commodities => vec![
            q("GC=F", "Gold", 2641.0, 0.0),
            q("CL=F", "WTI Crude", 71.72, 0.0),
            q("BZ=F", "Brent Crude", 74.64, 0.0),
            q("NG=F", "Natural Gas", 3.63, 0.0),
            q("HG=F", "Copper", 4.03, 0.0),
        ],
        _ => Vec::new(),
    }
}

fn w(id: &str, event: &str, severity: &str, headline: &str, lat: f64, lon: f64) -> WeatherAlert {
    WeatherAlert {
        id: id.into(),
        event: event.into(),
        severity: severity.into(),
        headline: headline.into(),
        lat,
        lon,
    }
}

/// Eight representative severe-weather alerts.
pub fn weather() -> Vec<WeatherAlert> {
    vec![
        w("static-wx-1", "Winter Storm Warning", "Severe", "Heavy snow expected across the Upper Midwest", 44.98, -93.27),
        w("static-wx-2", "Hurricane Watch", "Extreme", "Tropical system approaching the Gulf Coast", 29.95, -90.07),
        w("static-wx-3", "Excessive Heat Warning", "Severe", "Dangerous heat index values in the Desert Southwest", 33.45, -112.07),
        w("static-wx-4", "Flood Warning", "Moderate", "River flooding along the lower Mississippi", 35.15, -90.05),
        w("static-wx-5", "Red Flag Warning", "Severe", "Critical fire weather in Southern California", 34.05, -118.24),
        w("static-wx-6", "Tornado Watch", "Severe", "Supercell thunderstorms possible in the Southern Plains", 35.47, -97.52),
        w("static-wx-7", "High Wind Warning", "Moderate", "Damaging gusts along the Front Range", 39.74, -104.99),
        w("static-wx-8", "Blizzard Warning", "Extreme", "Whiteout conditions in the Northern Plains", 46.81, -100.78),
    ]
}

fn inc(id: &str, title: &str, lat: f64, lon: f64, country: &str, magnitude: Option<f64>) -> GeoIncident {
    GeoIncident {
        id: id.into(),
        title: title.into(),
        lat,
        lon,
        country: Some(country.into()),
        occurred_at: snapshot_time(),
        magnitude,
    }
}

pub fn incidents(domain: Domain) -> Vec<GeoIncident> {
    match domain {
        Domain::Protests => vec![
            inc("static-pr-1", "Labour demonstration", 48.86, 2.35, "FR", None),
            inc("static-pr-2", "Anti-government rally", -34.60, -58.38, "AR", None),
            inc("static-pr-3", "Student protest", 37.57, 126.98, "KR", None),
        ],
        Domain::Conflicts => vec![
            inc("static-cf-1", "Armed clashes reported", 48.00, 37.80, "UA", None),
            inc("static-cf-2", "Shelling reported", 31.50, 34.47, "PS", None),
            inc("static-cf-3", "Armed group activity", 15.50, 32.56, "SD", None),
        ],
        Domain::CyberThreats => vec![
            inc("static-cy-1", "Ransomware campaign against logistics firms", 52.37, 4.90, "NL", None),
            inc("static-cy-2", "DDoS against financial services", 40.71, -74.01, "US", None),
        ],
        Domain::HungerZones => vec![
            inc("static-hz-1", "IPC phase 5 famine conditions", 15.50, 32.56, "SD", None),
            inc("static-hz-2", "IPC phase 4 emergency", 15.35, 44.21, "YE", None),
            inc("static-hz-3", "IPC phase 4 emergency", 18.54, -72.34, "HT", None),
        ],
        Domain::Fires => vec![
            inc("static-fi-1", "Satellite fire detection", -3.47, -62.22, "BR", None),
            inc("static-fi-2", "Satellite fire detection", 61.52, 105.32, "RU", None),
            inc("static-fi-3", "Satellite fire detection", -25.27, 133.78, "AU", None),
        ],
        Domain::Outages => vec![
            inc("static-ou-1", "Regional internet outage", 33.89, 35.50, "LB", None),
            inc("static-ou-2", "Power grid disruption", -33.92, 18.42, "ZA", None),
        ],
        Domain::Earthquakes => vec![
            inc("static-eq-1", "M5.1 earthquake", 35.68, 139.69, "JP", Some(5.1)),
            inc("static-eq-2", "M4.6 earthquake", -33.45, -70.67, "CL", Some(4.6)),
            inc("static-eq-3", "M4.9 earthquake", 38.42, 27.14, "TR", Some(4.9)),
        ],
        _ => Vec::new(),
    }
}

fn track(id: &str, callsign: &str, kind: TrackKind, lat: f64, lon: f64, country: &str) -> MilitaryTrack {
    MilitaryTrack {
        id: id.into(),
        callsign: callsign.into(),
        kind,
        lat,
        lon,
        operator_country: country.into(),
        observed_at: snapshot_time(),
        ais_gap: false,
    }
}

pub fn tracks(domain: Domain) -> Vec<MilitaryTrack> {
    match domain {
        Domain::MilitaryFlights => vec![
            track("static-af-1", "RCH401", TrackKind::Aircraft, 50.03, 8.57, "US"),
            track("static-af-2", "NATO01", TrackKind::Aircraft, 54.50, 18.60, "NATO"),
            track("static-af-3", "RRR7201", TrackKind::Aircraft, 52.36, -1.14, "GB"),
        ],
        Domain::Vessels => vec![
            track("static-vs-1", "USS GERALD R FORD", TrackKind::Vessel, 34.50, 33.00, "US"),
            track("static-vs-2", "HMS PRINCE OF WALES", TrackKind::Vessel, 50.80, -1.10, "GB"),
            track("static-vs-3", "FS CHARLES DE GAULLE", TrackKind::Vessel, 43.10, 5.93, "FR"),
        ],
        _ => Vec::new(),
    }
}

fn ind(id: &str, name: &str, value: f64, unit: &str, period: &str) -> Indicator {
    Indicator {
        id: id.into(),
        name: name.into(),
        value,
        unit: unit.into(),
        period: period.into(),
    }
}

pub fn indicators(domain: Domain) -> Vec<Indicator> {
    match domain {
        Domain::EconomicIndicators => vec![
            ind("us-cpi-yoy", "US CPI (YoY)", 2.7, "%", "2024-11"),
            ind("us-unemployment", "US Unemployment Rate", 4.2, "%", "2024-11"),
            ind("fed-funds", "Fed Funds Target (upper)", 4.5, "%", "2024-12"),
            ind("us-10y", "US 10Y Treasury Yield", 4.57, "%", "2024-12"),
        ],
        Domain::TradePolicy => vec![
            ind("us-avg-tariff", "US Average Applied Tariff", 2.4, "%", "2024"),
            ind("wto-disputes-active", "Active WTO Disputes", 24.0, "count", "2024"),
        ],
        Domain::SupplyChain => vec![
            ind("gscpi", "Global Supply Chain Pressure Index", -0.12, "std", "2024-11"),
            ind("wci", "World Container Index", 3905.0, "USD/FEU", "2024-12"),
            ind("bdi", "Baltic Dry Index", 997.0, "index", "2024-12"),
        ],
        Domain::NaturalResources => vec![
            ind("opec-output", "OPEC Crude Output", 26.7, "mb/d", "2024-11"),
            ind("lithium-carbonate", "Lithium Carbonate Price", 10.3, "USD/kg", "2024-12"),
        ],
        Domain::Population => vec![
            ind("world-pop", "World Population", 8.16, "billion", "2024"),
            ind("displaced", "Forcibly Displaced People", 122.6, "million", "2024"),
        ],
        _ => Vec::new(),
    }
}

/// The embedded dataset for `domain` in its layer shape.
pub fn dataset(domain: Domain) -> LayerData {
    match domain {
        Domain::Markets | Domain::Crypto | Domain::Sectors | Domain::Commodities => {
            LayerData::Quotes(quotes(domain))
        }
        Domain::Weather => LayerData::Weather(weather()),
        Domain::MilitaryFlights | Domain::Vessels => LayerData::Tracks(tracks(domain)),
        Domain::EconomicIndicators
        | Domain::TradePolicy
        | Domain::SupplyChain
        | Domain::NaturalResources
        | Domain::Population => LayerData::Indicators(indicators(domain)),
        Domain::Protests
        | Domain::Conflicts
        | Domain::CyberThreats
        | Domain::HungerZones
        | Domain::Fires
        | Domain::Outages
        | Domain::Earthquakes => LayerData::Incidents(incidents(domain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_domain_has_a_non_empty_dataset() {
        for d in Domain::ALL {
            assert!(!dataset(d).is_empty(), "{d} has no static data");
        }
    }

    #[test]
    fn weather_has_eight_alerts() {
        assert_eq!(weather().len(), 8);
    }
}
