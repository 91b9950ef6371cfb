use thiserror::Error;

use crate::llm::LLMError;
use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a generation is already running for '{0}'")]
    AlreadyActive(String),

    #[error("no running generation for '{0}'")]
    NotFound(String),

    #[error("prompt empty or too short")]
    EmptyPrompt,

    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("provider failed: {0}")]
    Provider(String),

    #[error("failed to persist session data: {0}")]
    Persistence(#[from] StorageError),
}

impl From<LLMError> for SessionError {
    fn from(e: LLMError) -> Self {
        Self::Provider(e.to_string())
    }
}
