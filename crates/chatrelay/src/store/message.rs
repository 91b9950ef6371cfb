//! Message storage trait.

use async_trait::async_trait;

use crate::conversation::ChatMessage;

use super::error::StorageResult;

/// Storage for the messages of every conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message, keyed by `message_id`.
    ///
    /// Checkpoints and the terminal answer of a generation share one id, so
    /// the last save wins.
    async fn save_message(&self, message: &ChatMessage) -> StorageResult<()>;

    /// Load the latest version of every message in a conversation, in the
    /// order the messages were first saved.
    ///
    /// An unknown conversation yields an empty list.
    async fn load_messages(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>>;
}
