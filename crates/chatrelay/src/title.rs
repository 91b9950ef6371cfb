//! Conversation title generation.
//!
//! Titles are computed after the first answer of a new conversation. The work
//! is best effort: callers log failures and keep the default title.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::TitleConfig;
use crate::llm::{ChatRequest, LLMError, LLMProvider, Message, ProviderRegistry, Role};

/// Longest title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 80;

const TITLE_INSTRUCTION: &str = "Write a concise title for this conversation in 5 words or less. \
Reply with the title only, without quotes or trailing punctuation.";

/// Characters of each side of the exchange shown to the model.
const EXCERPT_CHARS: usize = 1_000;

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("title provider failed: {0}")]
    Provider(#[from] LLMError),

    #[error("title provider returned an empty title")]
    Empty,

    #[error("no endpoint named '{0}' for titles")]
    UnknownEndpoint(String),
}

#[async_trait]
pub trait TitleGenerator: Send + Sync {
    /// Produce a title for a conversation on `endpoint` that began with
    /// `prompt` and `answer`.
    async fn generate(&self, endpoint: &str, prompt: &str, answer: &str)
    -> Result<String, TitleError>;
}

/// Asks a chat endpoint for a title.
pub struct LlmTitleGenerator {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl LlmTitleGenerator {
    #[must_use]
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TitleGenerator for LlmTitleGenerator {
    async fn generate(
        &self,
        _endpoint: &str,
        prompt: &str,
        answer: &str,
    ) -> Result<String, TitleError> {
        let exchange = format!(
            "User: {}\nAssistant: {}",
            excerpt(prompt, EXCERPT_CHARS),
            excerpt(answer, EXCERPT_CHARS)
        );
        let mut request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::text(Role::System, TITLE_INSTRUCTION),
                Message::text(Role::User, exchange),
            ],
        );
        request.temperature = Some(0.2);
        request.max_tokens = Some(24);

        let response = self.provider.chat(request).await?;
        clean_title(response.first_text()).ok_or(TitleError::Empty)
    }
}

/// Titles through the configured endpoints.
///
/// Uses the endpoint named in [`TitleConfig`] when set, otherwise the
/// conversation's own endpoint and its default model.
pub struct EndpointTitleGenerator {
    providers: ProviderRegistry,
    endpoint: Option<String>,
    model: Option<String>,
}

impl EndpointTitleGenerator {
    #[must_use]
    pub fn new(providers: ProviderRegistry, config: &TitleConfig) -> Self {
        Self {
            providers,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl TitleGenerator for EndpointTitleGenerator {
    async fn generate(
        &self,
        endpoint: &str,
        prompt: &str,
        answer: &str,
    ) -> Result<String, TitleError> {
        let name = self.endpoint.as_deref().unwrap_or(endpoint);
        let target = self
            .providers
            .get(name)
            .ok_or_else(|| TitleError::UnknownEndpoint(name.to_string()))?;
        let model = self.model.clone().unwrap_or_else(|| target.model.clone());

        LlmTitleGenerator::new(target.provider.clone(), model)
            .generate(name, prompt, answer)
            .await
    }
}

/// Normalize a model-written title: one line, no wrapping quotes, no trailing
/// period, at most [`MAX_TITLE_CHARS`] characters.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().find(|l| !l.trim().is_empty())?.trim();
    let line = line.strip_prefix("Title:").unwrap_or(line).trim();
    let title = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '*'))
        .trim_end_matches('.')
        .trim();

    if title.is_empty() {
        return None;
    }
    Some(excerpt(title, MAX_TITLE_CHARS).to_string())
}

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
