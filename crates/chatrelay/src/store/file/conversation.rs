use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::warn;

use super::{conversation_dir, conversations_root, ensure_dir};
use crate::conversation::{Conversation, is_valid_id};
use crate::store::conversation::ConversationStore;
use crate::store::error::{StorageError, StorageResult};
use crate::sync::KeyedLocks;

const CONVERSATION_FILE: &str = "conversation.yaml";

/// One YAML record per conversation directory.
#[derive(Clone)]
pub struct FileConversationStore {
    data_dir: PathBuf,
    locks: KeyedLocks,
}

impl FileConversationStore {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, locks: KeyedLocks) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks,
        }
    }

    async fn read_record(&self, conversation_id: &str) -> StorageResult<Option<Conversation>> {
        let path = conversation_dir(&self.data_dir, conversation_id)?.join(CONVERSATION_FILE);

        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        serde_saphyr::from_str(&contents)
            .map(Some)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))
    }

    /// Atomic replace of the record file. Callers hold the conversation lock.
    async fn write_record(&self, conversation: &Conversation) -> StorageResult<()> {
        let dir = conversation_dir(&self.data_dir, &conversation.conversation_id)?;
        let final_path = dir.join(CONVERSATION_FILE);
        let temp_path = dir.join("conversation.yaml.tmp");

        let yaml = serde_saphyr::to_string(conversation)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        ensure_dir(&dir).await?;
        fs::write(&temp_path, yaml.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::file_io(&final_path, e))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        let root = conversations_root(&self.data_dir);
        let mut entries = match fs::read_dir(&root).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&root, e)),
        };

        let mut conversations = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_valid_id(&name) {
                continue;
            }
            match self.read_record(&name).await {
                Ok(Some(conversation)) => conversations.push(conversation),
                Ok(None) => {}
                Err(e) => warn!(conversation_id = %name, error = %e, "Skipping unreadable conversation"),
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<Conversation>> {
        self.read_record(conversation_id).await
    }

    async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        let _guard = self.locks.acquire(&conversation.conversation_id).await;
        self.write_record(conversation).await
    }

    async fn upsert_conversation(
        &self,
        conversation: &Conversation,
    ) -> StorageResult<Conversation> {
        let _guard = self.locks.acquire(&conversation.conversation_id).await;
        let stored = match self.read_record(&conversation.conversation_id).await? {
            Some(existing) => existing.refreshed_by(conversation),
            None => conversation.clone(),
        };
        self.write_record(&stored).await?;
        Ok(stored)
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> StorageResult<()> {
        let _guard = self.locks.acquire(conversation_id).await;
        let conversation = self
            .read_record(conversation_id)
            .await?
            .ok_or_else(|| StorageError::not_found("conversation", conversation_id))?;

        self.write_record(&Conversation {
            title: title.to_string(),
            updated_at: Utc::now(),
            ..conversation
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_get_and_title() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path(), KeyedLocks::new());

        assert!(store.get_conversation("conv-1").await.unwrap().is_none());
        assert!(store.get_title("conv-1").await.unwrap().is_none());

        let mut conversation = Conversation::new("conv-1", "openai");
        conversation.model = Some("gpt-4o-mini".to_string());
        store.save_conversation(&conversation).await.unwrap();

        conversation.title = "Rust lifetimes".to_string();
        store.save_conversation(&conversation).await.unwrap();

        let loaded = store.get_conversation("conv-1").await.unwrap().unwrap();
        assert_eq!(loaded, conversation);
        assert_eq!(
            store.get_title("conv-1").await.unwrap().as_deref(),
            Some("Rust lifetimes")
        );
    }

    #[tokio::test]
    async fn set_title_updates_existing_conversation_only() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path(), KeyedLocks::new());

        let missing = store.set_title("conv-1", "Anything").await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));

        let conversation = Conversation::new("conv-1", "openai");
        store.save_conversation(&conversation).await.unwrap();
        store.set_title("conv-1", "Sourdough").await.unwrap();

        let loaded = store.get_conversation("conv-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Sourdough");
        assert_eq!(loaded.endpoint, "openai");
        assert!(loaded.updated_at >= conversation.updated_at);
    }

    #[tokio::test]
    async fn upsert_inserts_then_keeps_title() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path(), KeyedLocks::new());

        let first = Conversation::new("conv-1", "openai");
        let stored = store.upsert_conversation(&first).await.unwrap();
        assert_eq!(stored, first);

        store.set_title("conv-1", "Sourdough").await.unwrap();

        let mut follow_up = Conversation::new("conv-1", "anthropic");
        follow_up.model = Some("claude-sonnet-4-5".to_string());
        let stored = store.upsert_conversation(&follow_up).await.unwrap();

        assert_eq!(stored.title, "Sourdough");
        assert_eq!(stored.endpoint, "anthropic");
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(store.get_conversation("conv-1").await.unwrap(), Some(stored));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn title_survives_concurrent_upsert() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path(), KeyedLocks::new());

        for round in 0..20 {
            let id = format!("conv-{round}");
            store
                .save_conversation(&Conversation::new(&id, "openai"))
                .await
                .unwrap();

            let title = format!("Title {round}");
            let titles = {
                let (store, id, title) = (store.clone(), id.clone(), title.clone());
                tokio::spawn(async move { store.set_title(&id, &title).await })
            };
            let upsert = {
                let (store, incoming) = (store.clone(), Conversation::new(&id, "openai"));
                tokio::spawn(async move { store.upsert_conversation(&incoming).await })
            };
            titles.await.unwrap().unwrap();
            upsert.await.unwrap().unwrap();

            let loaded = store.get_conversation(&id).await.unwrap().unwrap();
            assert_eq!(loaded.title, title, "round {round}");
        }
    }

    #[tokio::test]
    async fn list_orders_by_recent_update() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path(), KeyedLocks::new());

        let older = Conversation::new("older", "openai");
        let mut newer = Conversation::new("newer", "openai");
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);

        store.save_conversation(&older).await.unwrap();
        store.save_conversation(&newer).await.unwrap();

        let ids: Vec<_> = store
            .list_conversations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, ["newer", "older"]);
    }

    #[tokio::test]
    async fn list_on_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FileConversationStore::new(tmp.path().join("missing"), KeyedLocks::new());
        assert!(store.list_conversations().await.unwrap().is_empty());
    }
}
