// src/fallback/generative.rs
//! Generative approximation rungs.
//!
//! A provider sends a domain-specific prompt to an OpenAI-compatible chat
//! completions endpoint and expects a JSON object back. The reply is often
//! wrapped in prose or code fences; parsing strips that and fails closed.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{LadderProvider, RungKind};
use crate::error::IngestError;
use crate::model::{Domain, LayerItem};

/// Raw text completion, one request per call.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// Chat Completions client for any OpenAI-compatible endpoint.
pub struct ChatCompletionsClient {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(name: &str, base_url: &str, model: &str, api_key: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("situation-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(IngestError::RateLimited.into());
        }
        if !status.is_success() {
            return Err(IngestError::UpstreamUnavailable(format!("{} returned {status}", self.name)).into());
        }
        let body: Resp = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| IngestError::ParseFailure("completion had no choices".into()).into())
    }
}

/// Prompt and expected payload shape for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
    /// Top-level key holding the record array.
    pub items_key: &'static str,
    /// Keys that must be present for the payload to be accepted.
    pub required_keys: Vec<&'static str>,
}

impl PromptTemplate {
    pub fn for_domain(domain: Domain) -> Self {
        let shape = match domain {
            Domain::Markets | Domain::Crypto | Domain::Sectors | Domain::Commodities => {
                r#"{"symbol": string, "name": string, "price": number, "change_pct": number}"#
            }
            Domain::Weather => {
                r#"{"id": string, "event": string, "severity": string, "headline": string, "lat": number, "lon": number}"#
            }
            Domain::MilitaryFlights | Domain::Vessels => {
                r#"{"id": string, "callsign": string, "kind": "aircraft"|"vessel", "lat": number, "lon": number, "operator_country": string, "observed_at": RFC3339}"#
            }
            Domain::TradePolicy
            | Domain::SupplyChain
            | Domain::EconomicIndicators
            | Domain::NaturalResources
            | Domain::Population => {
                r#"{"id": string, "name": string, "value": number, "unit": string, "period": string}"#
            }
            Domain::Protests
            | Domain::Conflicts
            | Domain::CyberThreats
            | Domain::HungerZones
            | Domain::Fires
            | Domain::Outages
            | Domain::Earthquakes => {
                r#"{"id": string, "title": string, "lat": number, "lon": number, "country": string|null, "occurred_at": RFC3339, "magnitude": number|null}"#
            }
        };
        let label = domain.as_str().replace('_', " ");
        Self {
            system: "You approximate live situational data when the primary feed is down. \
                     Respond with a single JSON object and nothing else."
                .to_string(),
            user: format!(
                "Give your best current estimate for {label}. Return {{\"items\": [...], \"as_of\": RFC3339}} \
                 where each item is {shape}. Use at most 25 items."
            ),
            items_key: "items",
            required_keys: vec!["items"],
        }
    }
}

/// Strip code fences and surrounding prose, then parse the outermost JSON
/// object and check the required keys. Anything malformed is a
/// `ParseFailure`.
pub fn parse_generative_payload(
    raw: &str,
    required_keys: &[&str],
) -> Result<serde_json::Value, IngestError> {
    let unfenced = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
        return Err(IngestError::ParseFailure("no JSON object in response".into()));
    };
    if end < start {
        return Err(IngestError::ParseFailure("unbalanced JSON object".into()));
    }

    let value: serde_json::Value = serde_json::from_str(&unfenced[start..=end])
        .map_err(|e| IngestError::ParseFailure(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| IngestError::ParseFailure("top-level value is not an object".into()))?;
    if let Some(missing) = required_keys.iter().find(|k| !obj.contains_key(**k)) {
        return Err(IngestError::ParseFailure(format!("missing key `{missing}`")));
    }
    Ok(value)
}

/// Per-day cap on generative calls across every domain. Resets when the UTC
/// date changes. A limit of zero means unlimited.
#[derive(Debug)]
pub struct DailyBudget {
    limit: u32,
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    /// Reserve one call; `false` once today's budget is spent.
    pub fn try_consume(&self) -> bool {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let today = Utc::now().date_naive();
        if st.0 != today {
            *st = (today, 0);
        }
        if self.limit > 0 && st.1 >= self.limit {
            return false;
        }
        st.1 = st.1.saturating_add(1);
        true
    }

    pub fn used_today(&self) -> u32 {
        let st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if st.0 == Utc::now().date_naive() {
            st.1
        } else {
            0
        }
    }
}

/// Ladder rung backed by a [`CompletionClient`].
pub struct GenerativeProvider<T> {
    client: Arc<dyn CompletionClient>,
    template: PromptTemplate,
    timeout: Duration,
    budget: Option<Arc<DailyBudget>>,
    _item: PhantomData<fn() -> T>,
}

impl<T: LayerItem> GenerativeProvider<T> {
    pub fn new(client: Arc<dyn CompletionClient>, domain: Domain, timeout: Duration) -> Self {
        Self {
            client,
            template: PromptTemplate::for_domain(domain),
            timeout,
            budget: None,
            _item: PhantomData,
        }
    }

    pub fn with_budget(mut self, budget: Arc<DailyBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    fn decode(&self, raw: &str) -> Result<Vec<T>, IngestError> {
        let mut payload = parse_generative_payload(raw, &self.template.required_keys)?;
        let items = payload
            .get_mut(self.template.items_key)
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(items).map_err(|e| IngestError::ParseFailure(e.to_string()))
    }
}

#[async_trait]
impl<T: LayerItem> LadderProvider<T> for GenerativeProvider<T> {
    fn name(&self) -> &str {
        self.client.name()
    }

    fn rung(&self) -> RungKind {
        RungKind::Generative
    }

    async fn provide(
        &self,
        domain: Domain,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, IngestError> {
        if let Some(budget) = &self.budget {
            if !budget.try_consume() {
                tracing::info!(target: "fallback", %domain, provider = self.name(), "daily generative budget spent");
                return Err(IngestError::RateLimited);
            }
        }
        counter!("generative_calls_total", "domain" => domain.as_str()).increment(1);

        let call = self.client.complete(&self.template.system, &self.template.user);
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(IngestError::UpstreamUnavailable(format!("{} call cancelled", self.name())));
            }
            res = tokio::time::timeout(self.timeout, call) => match res {
                Err(_) => return Err(IngestError::Timeout(self.timeout)),
                Ok(Err(e)) => return Err(IngestError::classify(&e)),
                Ok(Ok(raw)) => raw,
            },
        };

        let items = self.decode(&raw)?;
        if items.is_empty() {
            return Err(IngestError::EmptyResult);
        }
        Ok(items)
    }
}
