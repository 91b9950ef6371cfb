//! Conversation and message records.
//!
//! A single [`ChatMessage`] shape covers user prompts, in-progress checkpoints
//! (`unfinished`) and the terminal answer of a generation. Saving a message with
//! an existing `message_id` replaces the earlier version.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parent id of the first message in a conversation.
pub const ROOT_PARENT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Title given to conversations until a generated one is stored.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Finish reason recorded on answers that were cut short.
pub const FINISH_REASON_INCOMPLETE: &str = "incomplete";

/// Sender label stored on user prompts.
pub const USER_SENDER: &str = "User";

/// Create a fresh conversation or message id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether `id` is safe to use as a storage key.
///
/// Accepts 1 to 128 ASCII alphanumerics, `-` and `_`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

// ============================================================================
// ChatMessage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub parent_message_id: String,
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub is_created_by_user: bool,
    /// Set on checkpoints written while generation is still running.
    #[serde(default)]
    pub unfinished: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A prompt typed by the user.
    #[must_use]
    pub fn user(
        conversation_id: impl Into<String>,
        parent_message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: new_id(),
            conversation_id: conversation_id.into(),
            parent_message_id: parent_message_id.into(),
            sender: USER_SENDER.to_string(),
            text: text.into(),
            is_created_by_user: true,
            unfinished: false,
            cancelled: false,
            error: false,
            model: None,
            finish_reason: None,
            prompt_tokens: None,
            completion_tokens: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record ends a generation (anything but a checkpoint).
    pub fn is_terminal(&self) -> bool {
        !self.is_created_by_user && !self.unfinished
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub title: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            title: DEFAULT_TITLE.to_string(),
            endpoint: endpoint.into(),
            model: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// This stored record refreshed by a new ask: endpoint, model and update
    /// time come from `incoming`, title and creation time stay.
    #[must_use]
    pub fn refreshed_by(&self, incoming: &Conversation) -> Self {
        Self {
            endpoint: incoming.endpoint.clone(),
            model: incoming.model.clone(),
            updated_at: incoming.updated_at.max(self.updated_at),
            ..self.clone()
        }
    }
}

// ============================================================================
// Threads
// ============================================================================

/// Follow parent links from `leaf_id` back to the root.
///
/// Returns the chain oldest-first. Unknown ids end the walk, and a cycle in the
/// stored links stops at the first repeated message.
pub fn thread_to<'a>(messages: &'a [ChatMessage], leaf_id: &str) -> Vec<&'a ChatMessage> {
    let by_id: HashMap<&str, &ChatMessage> = messages
        .iter()
        .map(|m| (m.message_id.as_str(), m))
        .collect();

    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = leaf_id;

    while let Some(message) = by_id.get(cursor) {
        if !seen.insert(cursor) {
            break;
        }
        chain.push(*message);
        cursor = message.parent_message_id.as_str();
    }

    chain.reverse();
    chain
}
