use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{conversation_dir, ensure_dir};
use crate::conversation::ChatMessage;
use crate::store::error::{StorageError, StorageResult};
use crate::store::message::MessageStore;
use crate::sync::KeyedLocks;

const MESSAGES_FILE: &str = "messages.jsonl";

/// Append-only JSONL message log per conversation.
#[derive(Clone)]
pub struct FileMessageStore {
    data_dir: PathBuf,
    locks: KeyedLocks,
}

impl FileMessageStore {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, locks: KeyedLocks) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks,
        }
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> StorageResult<()> {
        let dir = conversation_dir(&self.data_dir, &message.conversation_id)?;
        let path = dir.join(MESSAGES_FILE);

        let mut line =
            serde_json::to_string(message).map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.locks.acquire(&message.conversation_id).await;
        ensure_dir(&dir).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;

        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>> {
        let path = conversation_dir(&self.data_dir, conversation_id)?.join(MESSAGES_FILE);

        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            // A torn final line after a crash is skipped.
            let message: ChatMessage = match serde_json::from_str(line) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable message line");
                    continue;
                }
            };

            match slots.get(&message.message_id) {
                Some(&index) => messages[index] = message,
                None => {
                    slots.insert(message.message_id.clone(), messages.len());
                    messages.push(message);
                }
            }
        }

        Ok(messages)
    }
}
