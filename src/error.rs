// src/error.rs
//! Failure taxonomy shared by the fetchers, the fallback ladder and the scheduler.
//!
//! Every kind is resolved inside the component that detects it; nothing here
//! is meant to bubble up to the orchestration driver's caller.

use std::time::Duration;

/// One failed attempt to obtain data for a domain or feed.
///
/// `Clone` so that a single resolved in-flight request can be handed to every
/// caller attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("upstream rate limited")]
    RateLimited,
    #[error("upstream returned no items")]
    EmptyResult,
    #[error("could not parse upstream payload: {0}")]
    ParseFailure(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl IngestError {
    /// Short, stable label used for metrics and freshness records.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::NetworkFailure(_) => "network_failure",
            IngestError::RateLimited => "rate_limited",
            IngestError::EmptyResult => "empty_result",
            IngestError::ParseFailure(_) => "parse_failure",
            IngestError::UpstreamUnavailable(_) => "upstream_unavailable",
            IngestError::Timeout(_) => "timeout",
        }
    }

    /// Map an opaque collaborator error into the taxonomy.
    ///
    /// Errors that already are `IngestError` keep their kind; reqwest timeouts
    /// become `Timeout`; everything else is a `NetworkFailure`.
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<IngestError>() {
            return e.clone();
        }
        if let Some(e) = err.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return IngestError::Timeout(Duration::ZERO);
            }
            if e.status().map(|s| s.as_u16()) == Some(429) {
                return IngestError::RateLimited;
            }
            if e.is_decode() {
                return IngestError::ParseFailure(e.to_string());
            }
        }
        if err.downcast_ref::<serde_json::Error>().is_some() {
            return IngestError::ParseFailure(format!("{err:#}"));
        }
        IngestError::NetworkFailure(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_keeps_existing_kind() {
        let err = anyhow::Error::new(IngestError::RateLimited);
        assert_eq!(IngestError::classify(&err), IngestError::RateLimited);
    }

    #[test]
    fn classify_json_errors_as_parse_failure() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err = anyhow::Error::new(bad.unwrap_err());
        assert_eq!(IngestError::classify(&err).kind(), "parse_failure");
    }

    #[test]
    fn classify_unknown_as_network_failure() {
        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(
            IngestError::classify(&err),
            IngestError::NetworkFailure(msg) if msg.contains("connection reset")
        ));
    }
}
