// src/config/generative.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_daily_limit() -> u32 {
    200
}

/// One OpenAI-compatible endpoint. `api_key = "ENV:OPENAI_API_KEY"` reads
/// the key from that environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

/// Provider whose key has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerativeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Calls per UTC day across all domains; 0 disables the cap.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Tried in order: the first is provider A, the second provider B.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily_limit: default_daily_limit(),
            providers: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// The usable key, or `None` if it is empty or its variable is unset.
    pub fn resolve_key(&self) -> Option<String> {
        let raw = self.api_key.trim();
        let key = match raw.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("env:") => env::var(raw[4..].trim()).ok()?,
            _ => raw.to_string(),
        };
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }
}

impl GenerativeConfig {
    /// Providers with a usable key, at most two. Providers without one are
    /// skipped with a warning.
    pub fn resolved_providers(&self) -> Vec<ResolvedProvider> {
        if !self.enabled {
            return Vec::new();
        }
        self.providers
            .iter()
            .filter_map(|p| match p.resolve_key() {
                Some(api_key) => Some(ResolvedProvider {
                    name: p.name.clone(),
                    base_url: p.base_url.clone(),
                    model: p.model.clone(),
                    api_key,
                }),
                None => {
                    tracing::warn!(provider = %p.name, "generative provider has no api key, skipped");
                    None
                }
            })
            .take(2)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, key: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            base_url: "https://api.example.com/v1".into(),
            model: "small".into(),
            api_key: key.into(),
        }
    }

    #[serial_test::serial]
    #[test]
    fn env_keys_resolve_and_missing_ones_are_skipped() {
        env::set_var("SITUATION_TEST_KEY_A", "sk-a");
        env::remove_var("SITUATION_TEST_KEY_B");
        let cfg = GenerativeConfig {
            enabled: true,
            daily_limit: 10,
            providers: vec![
                provider("a", "ENV:SITUATION_TEST_KEY_A"),
                provider("b", "env:SITUATION_TEST_KEY_B"),
                provider("c", "literal-key"),
            ],
        };
        let got = cfg.resolved_providers();
        let names: Vec<_> = got.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(got[0].api_key, "sk-a");
        env::remove_var("SITUATION_TEST_KEY_A");
    }

    #[test]
    fn disabled_config_has_no_providers() {
        let cfg = GenerativeConfig {
            providers: vec![provider("a", "k")],
            ..GenerativeConfig::default()
        };
        assert!(cfg.resolved_providers().is_empty());
    }
}
