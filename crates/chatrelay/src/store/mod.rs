//! Persistence seams for conversations and messages.
//!
//! The session core only talks to the [`MessageStore`] and
//! [`ConversationStore`] traits; [`file`] holds the on-disk implementations.

mod conversation;
mod error;
pub mod file;
mod message;

pub use conversation::ConversationStore;
pub use error::{StorageError, StorageResult};
pub use message::MessageStore;
