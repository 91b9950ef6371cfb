//! OpenAI-compatible provider (OpenAI, OpenRouter, Ollama, vLLM, ...).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LLMError;
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message, StreamEvent, Usage};
use crate::sse_parser::{SseEvent, SseEventStream};

pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn post(&self) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url));
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<T: Serialize + Sync>(&self, body: &T) -> Result<reqwest::Response, LLMError> {
        let response = self.post().json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        Ok(self.send(&request).await?.json().await?)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let body = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self.send(&body).await?;
        let events = SseEventStream::new(Box::pin(response.bytes_stream()));
        Ok(Box::pin(CompletionChunks::new(events)))
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Maps decoded SSE events to [`StreamEvent`]s.
///
/// Usage and finish reason can arrive in different chunks (usage usually comes
/// last, after the choice carrying `finish_reason`), so both are held until
/// `[DONE]` or end of stream.
struct CompletionChunks<S> {
    inner: S,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    done: bool,
}

impl<S> CompletionChunks<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            usage: None,
            finish_reason: None,
            done: false,
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.done = true;
        StreamEvent::Done {
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        }
    }

    /// Absorb one SSE event. Returns a token when the chunk carried text.
    fn absorb(&mut self, event: &SseEvent) -> Option<String> {
        let chunk: Chunk = match serde_json::from_str(&event.data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(data = %event.data, error = %e, "Ignoring unparseable completion chunk");
                return None;
            }
        };

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let choice = chunk.choices.into_iter().next()?;
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        choice.delta.content.filter(|text| !text.is_empty())
    }
}

impl<S, E> Stream for CompletionChunks<S>
where
    S: Stream<Item = Result<SseEvent, E>> + Unpin,
    LLMError: From<E>,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    if event.data == "[DONE]" {
                        return Poll::Ready(Some(Ok(this.finish())));
                    }
                    if let Some(text) = this.absorb(&event) {
                        return Poll::Ready(Some(Ok(StreamEvent::Token(text))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => return Poll::Ready(Some(Ok(this.finish()))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
