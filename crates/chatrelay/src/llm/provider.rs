//! LLM provider trait and provider kinds.

use std::str::FromStr;

use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, ChatStream, StreamEvent};

// ============================================================================
// Provider
// ============================================================================

/// Known backends. All but [`Provider::Anthropic`] speak the OpenAI chat API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Provider {
    OpenAI,
    OpenRouter,
    Ollama,
    Anthropic,
    /// Any other OpenAI-compatible server; requires an explicit `base_url`.
    Other(String),
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
            Provider::Anthropic => "anthropic",
            Provider::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "openrouter" => Provider::OpenRouter,
            "ollama" => Provider::Ollama,
            "anthropic" => Provider::Anthropic,
            _ => Provider::Other(s.to_string()),
        })
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(provider) => provider,
            Err(never) => match never {},
        }
    }
}

// ============================================================================
// LLMProvider
// ============================================================================

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Single-shot completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Streaming completion.
    ///
    /// The default calls [`chat`](Self::chat) and yields the whole answer as
    /// one token followed by `Done`.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let response = self.chat(request).await?;
        let text = response.first_text().to_string();
        let finish_reason = response.choices.first().and_then(|c| c.finish_reason.clone());

        Ok(Box::pin(stream::iter([
            Ok(StreamEvent::Token(text)),
            Ok(StreamEvent::Done {
                usage: response.usage,
                finish_reason,
            }),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, Message, Role, Usage};
    use futures::StreamExt;

    struct OneShot;

    #[async_trait]
    impl LLMProvider for OneShot {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
            Ok(ChatResponse {
                id: "cmpl-1".to_string(),
                model: None,
                choices: vec![Choice {
                    index: 0,
                    message: Message::text(Role::Assistant, "whole answer"),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                }),
            })
        }
    }

    #[test]
    fn provider_names_round_trip() {
        for name in ["openai", "openrouter", "ollama", "anthropic"] {
            assert_eq!(Provider::from(name.to_string()).as_str(), name);
        }
        assert_eq!(Provider::from("OpenAI".to_string()), Provider::OpenAI);
        assert_eq!(
            Provider::from("vllm".to_string()),
            Provider::Other("vllm".to_string())
        );
    }

    #[tokio::test]
    async fn default_stream_wraps_single_shot() {
        let events: Vec<_> = OneShot
            .chat_stream(ChatRequest::new("m", vec![]))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Token(t)) if t == "whole answer"));
        assert!(matches!(
            &events[1],
            Ok(StreamEvent::Done { usage: Some(u), finish_reason: Some(r) })
                if u.total_tokens == 5 && r == "stop"
        ));
    }
}
