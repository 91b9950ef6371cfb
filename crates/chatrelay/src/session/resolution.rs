//! How a session ends and what gets written for it.

use chrono::{DateTime, Utc};

use crate::conversation::{ChatMessage, FINISH_REASON_INCOMPLETE};
use crate::llm::Usage;

/// What ended a generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The provider finished the answer.
    Complete {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
    /// An explicit abort or a client disconnect.
    Cancel,
    /// The provider stream failed or went idle.
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Errored,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Cancelled => "cancelled",
            Outcome::Errored => "errored",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial answers longer than this survive a provider failure.
pub const SALVAGE_MIN_CHARS: usize = 2;

/// The decided result of a session: outcome, final text and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub text: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl Resolution {
    /// Decide the terminal state from a trigger and the partial text seen so far.
    ///
    /// A failure after more than `salvage_min_chars` characters keeps the
    /// partial text as a cancelled answer. Shorter partials are replaced by
    /// the error description.
    pub fn decide(trigger: Trigger, partial: String, salvage_min_chars: usize) -> Self {
        match trigger {
            Trigger::Complete {
                usage,
                finish_reason,
            } => Self {
                outcome: Outcome::Completed,
                text: partial,
                usage,
                finish_reason,
            },
            Trigger::Cancel => Self::incomplete(partial),
            Trigger::Failure(_) if partial.chars().count() > salvage_min_chars => {
                Self::incomplete(partial)
            }
            Trigger::Failure(description) => Self {
                outcome: Outcome::Errored,
                text: description,
                usage: None,
                finish_reason: None,
            },
        }
    }

    fn incomplete(text: String) -> Self {
        Self {
            outcome: Outcome::Cancelled,
            text,
            usage: None,
            finish_reason: Some(FINISH_REASON_INCOMPLETE.to_string()),
        }
    }
}

// ============================================================================
// ResponseTemplate
// ============================================================================

/// Fields of the answer message fixed when the session opens.
///
/// Checkpoints and the terminal record share `message_id`, so each save
/// replaces the previous version.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    pub message_id: String,
    pub conversation_id: String,
    pub parent_message_id: String,
    pub sender: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ResponseTemplate {
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        parent_message_id: impl Into<String>,
        sender: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            message_id: crate::conversation::new_id(),
            conversation_id: conversation_id.into(),
            parent_message_id: parent_message_id.into(),
            sender: sender.into(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    /// In-progress record of the answer.
    pub fn checkpoint(&self, text: &str) -> ChatMessage {
        let mut message = self.message(text.to_string());
        message.unfinished = true;
        message
    }

    /// The single record written when the session resolves.
    pub fn terminal(&self, resolution: &Resolution) -> ChatMessage {
        let mut message = self.message(resolution.text.clone());
        message.cancelled = resolution.outcome == Outcome::Cancelled;
        message.error = resolution.outcome == Outcome::Errored;
        message.finish_reason = resolution.finish_reason.clone();
        if let Some(usage) = resolution.usage {
            message.prompt_tokens = Some(usage.prompt_tokens);
            message.completion_tokens = Some(usage.completion_tokens);
        }
        message
    }

    fn message(&self, text: String) -> ChatMessage {
        ChatMessage {
            message_id: self.message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            parent_message_id: self.parent_message_id.clone(),
            sender: self.sender.clone(),
            text,
            is_created_by_user: false,
            unfinished: false,
            cancelled: false,
            error: false,
            model: Some(self.model.clone()),
            finish_reason: None,
            prompt_tokens: None,
            completion_tokens: None,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}
