//! Session lifecycle: open, relay, cancel and resolve.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{CreatedPayload, ErrorPayload, FinalPayload, PartialPayload};
use crate::background::BackgroundTasks;
use crate::config::StreamingConfig;
use crate::conversation::{
    ChatMessage, Conversation, ROOT_PARENT_ID, is_valid_id, new_id, thread_to,
};
use crate::llm::{ChatRequest, LLMProvider, Message, Role, StreamEvent};
use crate::store::{ConversationStore, MessageStore, StorageResult};
use crate::title::TitleGenerator;

use super::checkpoint::Checkpointer;
use super::error::SessionError;
use super::live::Session;
use super::registry::SessionRegistry;
use super::relay::{RelayEvent, StreamRelay, Transport};
use super::resolution::{Outcome, Resolution, ResponseTemplate, Trigger};

// ============================================================================
// Settings and requests
// ============================================================================

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub checkpoint_interval: Duration,
    pub salvage_min_chars: usize,
    pub idle_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for StreamSettings {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval(),
            salvage_min_chars: config.salvage_min_chars,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// A prompt to answer, with the endpoint settings already resolved.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Name of the endpoint, recorded on the conversation.
    pub endpoint: String,
    pub model: String,
    /// Sender label for the answer.
    pub sender: String,
    /// `None` starts a new conversation.
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
    pub override_parent_message_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(
        prompt: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            sender: sender.into(),
            conversation_id: None,
            parent_message_id: None,
            override_parent_message_id: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Identifiers of a newly opened session.
#[derive(Debug, Clone)]
pub struct SessionStarted {
    pub session_id: String,
    pub conversation_id: String,
    pub request_message_id: String,
    pub response_message_id: String,
}

// ============================================================================
// SessionManager
// ============================================================================

/// Opens generation sessions and resolves each exactly once.
#[derive(Clone)]
pub struct SessionManager {
    registry: SessionRegistry,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    titles: Option<Arc<dyn TitleGenerator>>,
    background: BackgroundTasks,
    settings: StreamSettings,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            messages,
            conversations,
            titles: None,
            background: BackgroundTasks::named("titles"),
            settings,
        }
    }

    /// Generate titles for new conversations after their first answer.
    #[must_use]
    pub fn with_titles(mut self, titles: Arc<dyn TitleGenerator>) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Start a generation and stream it to `transport`.
    ///
    /// The conversation record and the user message are persisted before
    /// this returns. Streaming then continues on a relay task.
    pub async fn open(
        &self,
        request: GenerationRequest,
        provider: Arc<dyn LLMProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionStarted, SessionError> {
        if request.prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        if let Some(id) = &request.conversation_id
            && !is_valid_id(id)
        {
            return Err(SessionError::InvalidConversationId(id.clone()));
        }

        let is_new = request.conversation_id.is_none();
        let conversation_id = request.conversation_id.clone().unwrap_or_else(new_id);
        if self.registry.contains(&conversation_id) {
            return Err(SessionError::AlreadyActive(conversation_id));
        }
        let parent_id = request
            .parent_message_id
            .clone()
            .unwrap_or_else(|| ROOT_PARENT_ID.to_string());

        let history = if is_new {
            Vec::new()
        } else {
            self.load_history(&conversation_id, &parent_id).await?
        };
        let conversation = Conversation {
            model: Some(request.model.clone()),
            ..Conversation::new(&conversation_id, &request.endpoint)
        };

        let request_message = ChatMessage::user(&conversation_id, &parent_id, &request.prompt);
        let response = ResponseTemplate::new(
            &conversation_id,
            request
                .override_parent_message_id
                .clone()
                .unwrap_or_else(|| request_message.message_id.clone()),
            &request.sender,
            &request.model,
        );

        let session = Arc::new(Session::new(
            request_message,
            conversation,
            response,
            is_new && parent_id == ROOT_PARENT_ID,
            StreamRelay::attach(transport),
        ));
        self.registry.register(session.clone())?;
        session.emitter().open();

        if let Err(e) = self.persist_opening(&session).await {
            error!(session_id = %session.id(), error = %e, "Failed to persist new session");
            self.registry.remove_session(session.key(), session.id());
            return Err(e.into());
        }

        session
            .emitter()
            .emit_partial(RelayEvent::Created(CreatedPayload {
                message: session.request_message().clone(),
                created: true,
            }));

        let mut chat = ChatRequest::new(&request.model, history);
        chat.messages
            .push(Message::text(Role::User, request.prompt.clone()));
        chat.temperature = request.temperature;
        chat.max_tokens = request.max_tokens;

        let started = SessionStarted {
            session_id: session.id().to_string(),
            conversation_id: conversation_id.clone(),
            request_message_id: session.request_message().message_id.clone(),
            response_message_id: session.response().message_id.clone(),
        };

        let manager = self.clone();
        self.registry
            .spawn(async move { manager.relay(session, provider, chat).await });

        info!(
            session_id = %started.session_id,
            conversation_id = %conversation_id,
            endpoint = %request.endpoint,
            model = %request.model,
            "Generation started"
        );
        Ok(started)
    }

    /// Abort the live generation of a conversation.
    ///
    /// Returns the final payload of the cancelled answer, or `NotFound` if
    /// nothing is running or another trigger resolved the session first.
    pub async fn cancel(&self, key: &str) -> Result<FinalPayload, SessionError> {
        let session = self.registry.lookup(key)?;
        info!(session_id = %session.id(), key = %key, "Cancelling generation");

        match self.resolve(&session, Trigger::Cancel).await {
            Some(result) => result,
            None => Err(SessionError::NotFound(key.to_string())),
        }
    }

    /// Cancel live sessions and wait for relay and title tasks.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.background.shutdown().await;
    }

    // ------------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------------

    /// Prior messages on the thread ending at `parent_id`, as provider input.
    async fn load_history(
        &self,
        conversation_id: &str,
        parent_id: &str,
    ) -> Result<Vec<Message>, SessionError> {
        let stored = self.messages.load_messages(conversation_id).await?;
        let history = thread_to(&stored, parent_id)
            .into_iter()
            .filter(|m| !m.error && !m.text.trim().is_empty())
            .map(|m| {
                let role = if m.is_created_by_user {
                    Role::User
                } else {
                    Role::Assistant
                };
                Message::text(role, m.text.clone())
            })
            .collect::<Vec<_>>();

        debug!(conversation_id = %conversation_id, messages = history.len(), "Loaded history");
        Ok(history)
    }

    async fn persist_opening(&self, session: &Session) -> StorageResult<()> {
        self.conversations
            .upsert_conversation(session.conversation())
            .await?;
        self.messages.save_message(session.request_message()).await
    }

    // ------------------------------------------------------------------------
    // Relay
    // ------------------------------------------------------------------------

    async fn relay(self, session: Arc<Session>, provider: Arc<dyn LLMProvider>, chat: ChatRequest) {
        let _entry = RegistryEntry {
            registry: self.registry.clone(),
            key: session.key().to_string(),
            session_id: session.id().to_string(),
        };
        let mut checkpointer = Checkpointer::new(
            session.clone(),
            self.messages.clone(),
            self.settings.checkpoint_interval,
        );
        let trigger = pump(
            &session,
            &mut checkpointer,
            provider,
            chat,
            self.settings.idle_timeout,
        )
        .await;
        self.resolve(&session, trigger).await;
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Write the terminal message and emit the terminal event.
    ///
    /// Returns `None` when another trigger already claimed the session.
    async fn resolve(
        &self,
        session: &Arc<Session>,
        trigger: Trigger,
    ) -> Option<Result<FinalPayload, SessionError>> {
        if !session.latch().try_begin_resolving() {
            debug!(session_id = %session.id(), trigger = ?trigger, "Session already resolving");
            return None;
        }
        session.cancel_token().cancel();

        let (resolution, message, saved) = {
            let _writes = session.latch().lock_writes().await;
            let resolution = Resolution::decide(
                trigger,
                session.partial().snapshot(),
                self.settings.salvage_min_chars,
            );
            let message = session.response().terminal(&resolution);
            let saved = self.messages.save_message(&message).await;
            (resolution, message, saved)
        };
        self.registry.remove_session(session.key(), session.id());

        if let Err(e) = saved {
            error!(session_id = %session.id(), error = %e, "Failed to persist terminal message");
            session.emitter().emit_terminal(RelayEvent::Error(ErrorPayload {
                message: format!("failed to save the response: {e}"),
                response_message: None,
            }));
            session.latch().finish();
            return Some(Err(e.into()));
        }

        let conversation = self.current_conversation(session).await;
        let payload = FinalPayload {
            title: conversation.title.clone(),
            is_final: true,
            conversation,
            request_message: session.request_message().clone(),
            response_message: message,
        };

        let event = match resolution.outcome {
            Outcome::Errored => RelayEvent::Error(ErrorPayload {
                message: resolution.text.clone(),
                response_message: Some(payload.response_message.clone()),
            }),
            Outcome::Completed | Outcome::Cancelled => {
                RelayEvent::Final(Box::new(payload.clone()))
            }
        };
        session.emitter().emit_terminal(event);
        session.latch().finish();

        info!(
            session_id = %session.id(),
            outcome = %resolution.outcome,
            chars = resolution.text.chars().count(),
            "Session resolved"
        );

        if resolution.outcome == Outcome::Completed && session.starts_conversation() {
            self.spawn_title(session, payload.response_message.text.clone());
        }
        Some(Ok(payload))
    }

    async fn current_conversation(&self, session: &Session) -> Conversation {
        match self
            .conversations
            .get_conversation(session.conversation().conversation_id.as_str())
            .await
        {
            Ok(Some(conversation)) => conversation,
            Ok(None) => session.conversation().clone(),
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Failed to reload conversation");
                session.conversation().clone()
            }
        }
    }

    fn spawn_title(&self, session: &Session, answer: String) {
        let Some(titles) = self.titles.clone() else {
            return;
        };
        let conversations = self.conversations.clone();
        let conversation_id = session.key().to_string();
        let endpoint = session.conversation().endpoint.clone();
        let prompt = session.request_message().text.clone();

        self.background.spawn(async move {
            let title = match titles.generate(&endpoint, &prompt, &answer).await {
                Ok(title) => title,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Title generation failed");
                    return;
                }
            };
            match conversations.set_title(&conversation_id, &title).await {
                Ok(()) => info!(conversation_id = %conversation_id, title = %title, "Title saved"),
                Err(e) => warn!(conversation_id = %conversation_id, error = %e, "Failed to save title"),
            }
        });
    }
}

/// Drive the provider stream until it ends or the session is stopped.
/// Returns the trigger it ended with.
///
/// Only the waits on the provider race against cancellation. A checkpoint
/// write that has started always completes, so it lands before the terminal
/// message.
async fn pump(
    session: &Session,
    checkpointer: &mut Checkpointer,
    provider: Arc<dyn LLMProvider>,
    chat: ChatRequest,
    idle_timeout: Duration,
) -> Trigger {
    let disconnected = session.emitter().disconnected();

    let requested = tokio::select! {
        biased;
        trigger = stopped(session, &disconnected) => return trigger,
        requested = provider.chat_stream(chat) => requested,
    };
    let stream = match requested {
        Ok(stream) => stream,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "Provider request failed");
            return Trigger::Failure(SessionError::from(e).to_string());
        }
    };
    let mut stream = Box::pin(stream.timeout(idle_timeout));
    let mut text = String::new();

    loop {
        let item = tokio::select! {
            biased;
            trigger = stopped(session, &disconnected) => return trigger,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            break;
        };

        match item {
            Err(_) => {
                warn!(session_id = %session.id(), idle_timeout = ?idle_timeout, "Provider stream went idle");
                let idle = SessionError::Provider(format!("no data for {idle_timeout:?}"));
                return Trigger::Failure(idle.to_string());
            }
            Ok(Err(e)) => {
                warn!(session_id = %session.id(), error = %e, "Provider stream failed");
                return Trigger::Failure(SessionError::from(e).to_string());
            }
            Ok(Ok(StreamEvent::Token(delta))) => {
                if delta.is_empty() {
                    continue;
                }
                text.push_str(&delta);
                checkpointer.on_partial(&text, Instant::now()).await;
                session
                    .emitter()
                    .emit_partial(RelayEvent::Partial(PartialPayload {
                        message_id: session.response().message_id.clone(),
                        conversation_id: session.key().to_string(),
                        text: text.clone(),
                        delta,
                    }));
            }
            Ok(Ok(StreamEvent::Done {
                usage,
                finish_reason,
            })) => {
                return Trigger::Complete {
                    usage,
                    finish_reason,
                };
            }
        }
    }

    Trigger::Complete {
        usage: None,
        finish_reason: None,
    }
}

/// Resolves once the session is cancelled or its client goes away.
async fn stopped(session: &Session, disconnected: &CancellationToken) -> Trigger {
    tokio::select! {
        biased;
        _ = session.cancel_token().cancelled() => Trigger::Cancel,
        _ = disconnected.cancelled() => {
            info!(session_id = %session.id(), "Client disconnected; cancelling generation");
            Trigger::Cancel
        }
    }
}

/// Removes a session from the registry when its relay task exits, including
/// by panic.
struct RegistryEntry {
    registry: SessionRegistry,
    key: String,
    session_id: String,
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        self.registry.remove_session(&self.key, &self.session_id);
    }
}
