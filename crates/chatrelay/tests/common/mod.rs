//! Common test utilities.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use futures::StreamExt;
use http_body_util::BodyExt;
use tempfile::TempDir;

use chatrelay::llm::{
    ChatRequest, ChatResponse, ChatStream, Endpoint, LLMError, LLMProvider, ProviderRegistry,
    StreamEvent, Usage,
};
use chatrelay::server::{self, AppState};
use chatrelay::session::{SessionManager, StreamSettings};
use chatrelay::store::file::{FileConversationStore, FileMessageStore};
use chatrelay::store::{ConversationStore, MessageStore};
use chatrelay::sync::KeyedLocks;

/// Name of the endpoint every test app registers.
pub const ENDPOINT: &str = "mock";

// ============================================================================
// MockProvider
// ============================================================================

/// Provider that streams fixed tokens, then either finishes or stalls forever.
pub struct MockProvider {
    tokens: Vec<&'static str>,
    stall: bool,
}

impl MockProvider {
    pub fn answering(tokens: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.to_vec(),
            stall: false,
        })
    }

    /// Streams `tokens` and then never finishes.
    pub fn stalling(tokens: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.to_vec(),
            stall: true,
        })
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
        Err(LLMError::InvalidResponse("not supported".to_string()))
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChatStream, LLMError> {
        let tokens: Vec<Result<StreamEvent, LLMError>> = self
            .tokens
            .iter()
            .map(|t| Ok(StreamEvent::Token(t.to_string())))
            .collect();
        let head = futures::stream::iter(tokens);

        if self.stall {
            return Ok(Box::pin(head.chain(futures::stream::pending())));
        }
        let done = futures::stream::once(async {
            Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                }),
                finish_reason: Some("stop".to_string()),
            })
        });
        Ok(Box::pin(head.chain(done)))
    }
}

// ============================================================================
// Test app
// ============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _data_dir: TempDir,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// App backed by file stores in a temp dir, with `provider` registered as
/// [`ENDPOINT`].
pub fn test_app(provider: Arc<dyn LLMProvider>) -> TestApp {
    let data_dir = TempDir::new().unwrap();
    let locks = KeyedLocks::new();
    let messages: Arc<dyn MessageStore> =
        Arc::new(FileMessageStore::new(data_dir.path(), locks.clone()));
    let conversations: Arc<dyn ConversationStore> =
        Arc::new(FileConversationStore::new(data_dir.path(), locks));

    let mut providers = ProviderRegistry::new();
    providers.insert(
        ENDPOINT,
        Endpoint {
            provider,
            model: "mock-model".to_string(),
            sender: "Mock".to_string(),
        },
    );

    let state = AppState {
        sessions: SessionManager::new(
            messages.clone(),
            conversations.clone(),
            StreamSettings::default(),
        ),
        providers,
        conversations,
        messages,
        keep_alive_interval_seconds: 15,
        max_connections: 64,
    };

    TestApp {
        router: server::build_app(state.clone(), 30),
        state,
        _data_dir: data_dir,
    }
}

// ============================================================================
// Requests and bodies
// ============================================================================

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read body frames until the accumulated text contains `needle`.
pub async fn read_until(body: &mut Body, needle: &str) -> String {
    let mut seen = String::new();
    let read = async {
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                seen.push_str(&String::from_utf8_lossy(&data));
                if seen.contains(needle) {
                    return;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("needle not found in stream");
    seen
}

/// Parse `(event, data)` pairs from an SSE body.
pub fn parse_sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in body.lines() {
        if let Some(event_name) = line.strip_prefix("event:") {
            current_event = event_name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }

    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

/// Poll `check` until it holds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
