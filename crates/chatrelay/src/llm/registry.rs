//! Named chat endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};

use super::anthropic::AnthropicProvider;
use super::openai::OpenAICompatibleProvider;
use super::provider::{LLMProvider, Provider};
use crate::config::ProviderConfig;

/// Default base URLs per provider.
pub mod defaults {
    pub const OPENAI: &str = "https://api.openai.com/v1";
    pub const OPENROUTER: &str = "https://openrouter.ai/api/v1";
    pub const OLLAMA: &str = "http://localhost:11434/v1";
    pub const ANTHROPIC: &str = "https://api.anthropic.com";
}

/// A configured endpoint: a provider client plus the defaults used with it.
#[derive(Clone)]
pub struct Endpoint {
    pub provider: Arc<dyn LLMProvider>,
    pub model: String,
    pub sender: String,
}

/// Endpoints keyed by the name clients send in `AskRequest::endpoint`.
///
/// All HTTP-backed providers share one `reqwest::Client` for connection pooling.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    endpoints: HashMap<String, Endpoint>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build endpoints from configuration. Entries that cannot be used are
    /// logged and skipped.
    pub fn from_config<'a>(
        providers: impl IntoIterator<Item = (&'a String, &'a ProviderConfig)>,
    ) -> Self {
        let client = Client::new();
        let mut registry = Self::new();

        for (name, config) in providers {
            let base_url = match (&config.base_url, &config.provider) {
                (Some(url), _) => url.clone(),
                (None, Provider::OpenAI) => defaults::OPENAI.to_string(),
                (None, Provider::OpenRouter) => defaults::OPENROUTER.to_string(),
                (None, Provider::Ollama) => defaults::OLLAMA.to_string(),
                (None, Provider::Anthropic) => defaults::ANTHROPIC.to_string(),
                (None, Provider::Other(kind)) => {
                    warn!(endpoint = %name, provider = %kind, "Skipping endpoint without base_url");
                    continue;
                }
            };

            if config.api_key.is_none() && config.provider != Provider::Ollama {
                warn!(endpoint = %name, provider = %config.provider, "Endpoint has no api_key");
            }

            let provider: Arc<dyn LLMProvider> = match config.provider {
                Provider::Anthropic => Arc::new(AnthropicProvider::new(
                    client.clone(),
                    base_url,
                    config.api_key.clone(),
                )),
                _ => Arc::new(OpenAICompatibleProvider::new(
                    client.clone(),
                    base_url,
                    config.api_key.clone(),
                )),
            };

            info!(endpoint = %name, provider = %config.provider, model = %config.model, "Registered endpoint");
            registry.insert(
                name.clone(),
                Endpoint {
                    provider,
                    model: config.model.clone(),
                    sender: config.sender.clone(),
                },
            );
        }

        registry
    }

    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.insert(name.into(), endpoint);
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    /// Endpoint names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn builds_endpoints_and_skips_unroutable_ones() {
        let config = Config::parse(
            r#"
providers:
  openai:
    provider: openai
    api_key: "sk-test"
    model: "gpt-4o-mini"
  local:
    provider: ollama
    model: "llama3"
    sender: "Llama"
  custom:
    provider: vllm
    model: "qwen"
  pinned:
    provider: vllm
    base_url: "http://gpu:8000/v1"
    model: "qwen"
  claude:
    provider: anthropic
    api_key: "sk-ant-test"
    model: "claude-sonnet-4-5"
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::from_config(&config.providers);
        assert_eq!(registry.names(), ["claude", "local", "openai", "pinned"]);
        assert_eq!(registry.get("claude").unwrap().model, "claude-sonnet-4-5");
        assert_eq!(registry.get("local").unwrap().sender, "Llama");
        assert_eq!(registry.get("openai").unwrap().model, "gpt-4o-mini");
        assert!(registry.get("custom").is_none());
    }
}
