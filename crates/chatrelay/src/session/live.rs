use tokio_util::sync::CancellationToken;

use crate::conversation::{ChatMessage, Conversation};

use super::partial::PartialTextAccumulator;
use super::relay::Emitter;
use super::resolution::ResponseTemplate;
use super::state::{SessionLatch, SessionState};

/// One in-flight generation.
pub struct Session {
    id: String,
    key: String,
    cancel: CancellationToken,
    latch: SessionLatch,
    partial: PartialTextAccumulator,
    response: ResponseTemplate,
    request_message: ChatMessage,
    conversation: Conversation,
    starts_conversation: bool,
    emitter: Emitter,
}

impl Session {
    /// Build a session keyed by its conversation id.
    ///
    /// `starts_conversation` marks the first exchange of a new conversation,
    /// the only one that gets a generated title.
    #[must_use]
    pub fn new(
        request_message: ChatMessage,
        conversation: Conversation,
        response: ResponseTemplate,
        starts_conversation: bool,
        emitter: Emitter,
    ) -> Self {
        Self {
            id: format!("session_{}", ulid::Ulid::new()),
            key: conversation.conversation_id.clone(),
            cancel: CancellationToken::new(),
            latch: SessionLatch::new(),
            partial: PartialTextAccumulator::new(),
            response,
            request_message,
            conversation,
            starts_conversation,
            emitter,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry key: the conversation id.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.latch.state()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn partial(&self) -> &PartialTextAccumulator {
        &self.partial
    }

    pub fn response(&self) -> &ResponseTemplate {
        &self.response
    }

    pub fn request_message(&self) -> &ChatMessage {
        &self.request_message
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn starts_conversation(&self) -> bool {
        self.starts_conversation
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub(crate) fn latch(&self) -> &SessionLatch {
        &self.latch
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .field("response_message_id", &self.response.message_id)
            .finish_non_exhaustive()
    }
}
