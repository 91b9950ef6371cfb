//! Anthropic provider over the native Messages API.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LLMError;
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage};
use crate::sse_parser::{SseEvent, SseEventStream};

/// `max_tokens` is mandatory on the Messages API.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }

    fn post(&self) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", &self.api_version);
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn send(&self, body: &MessagesRequest) -> Result<reqwest::Response, LLMError> {
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
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let response: MessagesResponse = self.send(&to_request(request, false)).await?.json().await?;
        Ok(from_response(response))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let response = self.send(&to_request(request, true)).await?;
        let events = SseEventStream::new(Box::pin(response.bytes_stream()));
        Ok(Box::pin(MessageEvents::new(events)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessageUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct MessageUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<MessageUsage> for Usage {
    fn from(usage: MessageUsage) -> Self {
        Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// System messages move to the top-level `system` field; the rest keep
/// their order.
fn to_request(request: ChatRequest, stream: bool) -> MessagesRequest {
    let (system, messages): (Vec<Message>, Vec<Message>) = request
        .messages
        .into_iter()
        .partition(|m| m.role == Role::System);
    let system = system
        .into_iter()
        .map(|m| m.content)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();

    MessagesRequest {
        model: request.model,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages,
        temperature: request.temperature,
        stream,
    }
}

fn from_response(response: MessagesResponse) -> ChatResponse {
    let text = response
        .content
        .into_iter()
        .filter(|block| block.block_type == "text")
        .map(|block| block.text)
        .collect::<String>();

    ChatResponse {
        id: response.id,
        model: response.model,
        choices: vec![Choice {
            index: 0,
            message: Message::text(Role::Assistant, text),
            finish_reason: response.stop_reason,
        }],
        usage: response.usage.map(Usage::from),
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageEvent {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<MessageUsage>,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartedMessage {
    #[serde(default)]
    usage: Option<MessageUsage>,
}

#[derive(Deserialize)]
struct BlockDelta {
    /// Present on `text_delta`; tool input deltas carry `partial_json` instead.
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Maps Messages API stream events to [`StreamEvent`]s.
///
/// Input tokens arrive on `message_start`, output tokens and the stop reason
/// on `message_delta`; both are reported on the final `Done`.
struct MessageEvents<S> {
    inner: S,
    usage: MessageUsage,
    saw_usage: bool,
    stop_reason: Option<String>,
    done: bool,
}

impl<S> MessageEvents<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            usage: MessageUsage::default(),
            saw_usage: false,
            stop_reason: None,
            done: false,
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.done = true;
        StreamEvent::Done {
            usage: self.saw_usage.then(|| Usage::from(self.usage)),
            finish_reason: self.stop_reason.take(),
        }
    }

    /// Absorb one SSE event. Returns what to yield, if anything.
    fn absorb(&mut self, event: &SseEvent) -> Option<Result<StreamEvent, LLMError>> {
        let parsed: MessageEvent = match serde_json::from_str(&event.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(data = %event.data, error = %e, "Ignoring unparseable message event");
                return None;
            }
        };

        match parsed {
            MessageEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                    self.saw_usage = true;
                }
                None
            }
            MessageEvent::ContentBlockDelta { delta } => delta
                .text
                .filter(|text| !text.is_empty())
                .map(|text| Ok(StreamEvent::Token(text))),
            MessageEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    self.saw_usage = true;
                }
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                None
            }
            MessageEvent::MessageStop => Some(Ok(self.finish())),
            MessageEvent::Error { error } => {
                self.done = true;
                Some(Err(LLMError::Stream(format!("{}: {}", error.kind, error.message))))
            }
            MessageEvent::Other => None,
        }
    }
}

impl<S, E> Stream for MessageEvents<S>
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
                    if let Some(item) = this.absorb(&event) {
                        return Poll::Ready(Some(item));
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
