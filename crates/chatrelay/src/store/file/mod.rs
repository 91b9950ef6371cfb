//! File-based storage.
//!
//! Layout:
//! ```text
//! {data_dir}/conversations/
//!   {conversation_id}/
//!     conversation.yaml   # Conversation record (temp file + rename)
//!     messages.jsonl      # Append-only message versions, last line per id wins
//! ```
//!
//! Both stores serialize writes per conversation through a shared
//! [`KeyedLocks`](crate::sync::KeyedLocks).

use std::path::{Path, PathBuf};

use crate::conversation::is_valid_id;
use crate::store::error::{StorageError, StorageResult};

mod conversation;
mod message;

pub use conversation::FileConversationStore;
pub use message::FileMessageStore;

const CONVERSATIONS_DIR: &str = "conversations";

/// Directory holding one subdirectory per conversation.
pub fn conversations_root(data_dir: &Path) -> PathBuf {
    data_dir.join(CONVERSATIONS_DIR)
}

fn conversation_dir(data_dir: &Path, conversation_id: &str) -> StorageResult<PathBuf> {
    if !is_valid_id(conversation_id) {
        return Err(StorageError::InvalidId(conversation_id.to_string()));
    }
    Ok(conversations_root(data_dir).join(conversation_id))
}

pub async fn ensure_dir(dir: &Path) -> StorageResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::file_io(dir, e))
}
