//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, Conversation};

/// SSE event names used on the `/api/ask` stream.
pub mod sse {
    /// The persisted user message, sent once the session is open.
    pub const CREATED: &str = "created";
    /// Accumulated answer text so far.
    pub const PARTIAL: &str = "partial";
    /// Terminal event for completed and cancelled answers.
    pub const FINAL: &str = "final";
    /// Terminal event for failed answers and persistence failures.
    pub const ERROR: &str = "error";
}

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /api/ask`.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub text: String,
    /// Name of a configured provider endpoint.
    pub endpoint: String,
    /// Omit to start a new conversation.
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    /// Parent for the answer when it should not hang off the new prompt.
    #[serde(default)]
    pub override_parent_message_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Sender label for the answer. Defaults to the endpoint's.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Body of `POST /api/ask/abort`.
#[derive(Debug, Clone, Deserialize)]
pub struct AbortRequest {
    /// Conversation id of the generation to stop.
    pub abort_key: String,
}

// ============================================================================
// Stream payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPayload {
    pub message: ChatMessage,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialPayload {
    pub message_id: String,
    pub conversation_id: String,
    /// Text accumulated so far.
    pub text: String,
    /// Text added by this chunk.
    pub delta: String,
}

/// Payload of the `final` event, also returned by the abort endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalPayload {
    pub title: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub conversation: Conversation,
    pub request_message: ChatMessage,
    pub response_message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<ChatMessage>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ListConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
}
