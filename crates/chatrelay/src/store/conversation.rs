//! Conversation storage trait.

use async_trait::async_trait;

use crate::conversation::Conversation;

use super::error::StorageResult;

/// Storage for conversation records.
///
/// `upsert_conversation` and `set_title` each read and write one record as a
/// single step, so a title saved in the background is never overwritten by a
/// concurrent ask on the same conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// List all conversations, most recently updated first.
    async fn list_conversations(&self) -> StorageResult<Vec<Conversation>>;

    /// Load one conversation. Returns `Ok(None)` if it does not exist.
    async fn get_conversation(&self, conversation_id: &str)
    -> StorageResult<Option<Conversation>>;

    /// Insert or replace a conversation record.
    async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<()>;

    /// Insert `conversation`, or refresh the endpoint, model and update time
    /// of the stored record while keeping its title and creation time.
    /// Returns the record as stored.
    async fn upsert_conversation(&self, conversation: &Conversation)
    -> StorageResult<Conversation>;

    /// Replace the title of an existing conversation.
    async fn set_title(&self, conversation_id: &str, title: &str) -> StorageResult<()>;

    /// Current title of a conversation, if it exists.
    async fn get_title(&self, conversation_id: &str) -> StorageResult<Option<String>> {
        Ok(self
            .get_conversation(conversation_id)
            .await?
            .map(|c| c.title))
    }
}
