//! Test doubles for session tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::conversation::{ChatMessage, Conversation, ROOT_PARENT_ID};
use crate::llm::{ChatRequest, ChatResponse, ChatStream, LLMError, LLMProvider, StreamEvent, Usage};
use crate::store::{ConversationStore, MessageStore, StorageError, StorageResult};
use crate::title::{TitleError, TitleGenerator};

use super::live::Session;
use super::manager::StreamSettings;
use super::relay::{RelayEvent, StreamRelay, Transport};
use super::resolution::ResponseTemplate;

pub(crate) fn settings() -> StreamSettings {
    StreamSettings {
        checkpoint_interval: Duration::from_millis(500),
        salvage_min_chars: super::SALVAGE_MIN_CHARS,
        idle_timeout: Duration::from_secs(5),
    }
}

/// A session on a throwaway transport.
pub(crate) fn test_session(key: &str) -> Arc<Session> {
    let request = ChatMessage::user(key, ROOT_PARENT_ID, "hi");
    let response = ResponseTemplate::new(key, &request.message_id, "Assistant", "test-model");
    Arc::new(Session::new(
        request,
        Conversation::new(key, "test"),
        response,
        false,
        StreamRelay::start(SpyTransport::new()),
    ))
}

/// Poll `check` until it holds. Panics after a few seconds.
pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// RecordingStore
// ============================================================================

/// In-memory message and conversation store that records every write.
#[derive(Default)]
pub(crate) struct RecordingStore {
    saves: Mutex<Vec<ChatMessage>>,
    journal: Mutex<Vec<String>>,
    conversations: Mutex<HashMap<String, Conversation>>,
    checkpoint_delay: Mutex<Option<Duration>>,
    load_delay: Mutex<Option<Duration>>,
    fail_checkpoints: AtomicBool,
    fail_terminals: AtomicBool,
    fail_conversations: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_checkpoints(&self, on: bool) {
        self.fail_checkpoints.store(on, Ordering::SeqCst);
    }

    /// Make every checkpoint write take `delay`.
    pub(crate) fn slow_checkpoints(&self, delay: Duration) {
        *self.checkpoint_delay.lock().unwrap() = Some(delay);
    }

    /// Make every history load take `delay`.
    pub(crate) fn slow_loads(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn fail_terminals(&self, on: bool) {
        self.fail_terminals.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_conversations(&self, on: bool) {
        self.fail_conversations.store(on, Ordering::SeqCst);
    }

    /// Every successful save, in order.
    pub(crate) fn messages(&self) -> Vec<ChatMessage> {
        self.saves.lock().unwrap().clone()
    }

    /// Start and end of every message write, e.g. `"begin checkpoint"`.
    pub(crate) fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn note(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    pub(crate) fn terminals(&self) -> Vec<ChatMessage> {
        self.messages()
            .into_iter()
            .filter(ChatMessage::is_terminal)
            .collect()
    }

    pub(crate) fn checkpoints(&self) -> Vec<ChatMessage> {
        self.messages().into_iter().filter(|m| m.unfinished).collect()
    }

    pub(crate) fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.conversation_id.clone(), conversation);
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn save_message(&self, message: &ChatMessage) -> StorageResult<()> {
        let kind = if message.unfinished {
            "checkpoint"
        } else if message.is_terminal() {
            "terminal"
        } else {
            "user"
        };
        self.note(format!("begin {kind}"));

        if message.unfinished {
            let delay = *self.checkpoint_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_checkpoints.load(Ordering::SeqCst) {
                return Err(StorageError::backend("disk full"));
            }
        }
        if message.is_terminal() && self.fail_terminals.load(Ordering::SeqCst) {
            return Err(StorageError::backend("disk full"));
        }
        self.saves.lock().unwrap().push(message.clone());
        self.note(format!("end {kind}"));
        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>> {
        let delay = *self.load_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut latest: Vec<ChatMessage> = Vec::new();
        for message in self.messages() {
            if message.conversation_id != conversation_id {
                continue;
            }
            match latest.iter_mut().find(|m| m.message_id == message.message_id) {
                Some(slot) => *slot = message,
                None => latest.push(message),
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        Ok(self.conversations.lock().unwrap().values().cloned().collect())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<Conversation>> {
        Ok(self.conversation(conversation_id))
    }

    async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(StorageError::backend("read-only"));
        }
        self.insert_conversation(conversation.clone());
        Ok(())
    }

    async fn upsert_conversation(
        &self,
        conversation: &Conversation,
    ) -> StorageResult<Conversation> {
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(StorageError::backend("read-only"));
        }
        let mut conversations = self.conversations.lock().unwrap();
        let stored = match conversations.get(&conversation.conversation_id) {
            Some(existing) => existing.refreshed_by(conversation),
            None => conversation.clone(),
        };
        conversations.insert(stored.conversation_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> StorageResult<()> {
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(StorageError::backend("read-only"));
        }
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StorageError::not_found("conversation", conversation_id))?;
        conversation.title = title.to_string();
        conversation.updated_at = chrono::Utc::now();
        Ok(())
    }
}

// ============================================================================
// SpyTransport
// ============================================================================

/// Transport that records what it is sent.
#[derive(Default)]
pub(crate) struct SpyTransport {
    opens: AtomicUsize,
    closes: AtomicUsize,
    events: Mutex<Vec<RelayEvent>>,
    disconnected: CancellationToken,
    closed: CancellationToken,
}

impl SpyTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RelayEvent::name).collect()
    }

    pub(crate) fn last(&self) -> Option<RelayEvent> {
        self.events().pop()
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the client going away.
    pub(crate) fn disconnect(&self) {
        self.disconnected.cancel();
    }

    pub(crate) async fn wait_closed(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.closed.cancelled())
            .await
            .expect("transport was not closed");
    }
}

impl Transport for SpyTransport {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, event: RelayEvent) -> bool {
        self.events.lock().unwrap().push(event);
        true
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}

// ============================================================================
// ScriptedProvider
// ============================================================================

type Item = Result<StreamEvent, LLMError>;

enum Script {
    Events(Vec<Item>),
    Channel(mpsc::UnboundedReceiver<Item>),
    Refuse(String),
}

/// Provider that plays back one scripted stream.
pub(crate) struct ScriptedProvider {
    script: Mutex<Option<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn events(events: Vec<Item>) -> Arc<Self> {
        Self::with(Script::Events(events))
    }

    /// Stream `tokens`, then finish with usage.
    pub(crate) fn tokens(tokens: &[&str]) -> Arc<Self> {
        let mut events: Vec<Item> = tokens
            .iter()
            .map(|t| Ok(StreamEvent::Token(t.to_string())))
            .collect();
        events.push(Ok(StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: tokens.len() as u32,
                total_tokens: 7 + tokens.len() as u32,
            }),
            finish_reason: Some("stop".to_string()),
        }));
        Self::events(events)
    }

    /// A stream fed by the returned sender. It stays open until the sender drops.
    pub(crate) fn channel() -> (Arc<Self>, mpsc::UnboundedSender<Item>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with(Script::Channel(rx)), tx)
    }

    /// Fail the request before any data.
    pub(crate) fn refusing(message: &str) -> Arc<Self> {
        Self::with(Script::Refuse(message.to_string()))
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
        Err(LLMError::InvalidResponse("chat is not scripted".to_string()))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().take() {
            Some(Script::Events(events)) => Ok(Box::pin(futures::stream::iter(events))),
            Some(Script::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Script::Refuse(message)) => Err(LLMError::Api {
                status: 503,
                message,
            }),
            None => Err(LLMError::InvalidResponse("script already played".to_string())),
        }
    }
}

// ============================================================================
// StaticTitles
// ============================================================================

/// Title generator with a fixed answer.
pub(crate) struct StaticTitles {
    title: Option<String>,
    calls: AtomicUsize,
}

impl StaticTitles {
    pub(crate) fn new(title: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            title: title.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleGenerator for StaticTitles {
    async fn generate(
        &self,
        _endpoint: &str,
        _prompt: &str,
        _answer: &str,
    ) -> Result<String, TitleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.title.clone().ok_or(TitleError::Empty)
    }
}
