//! HTTP request handlers.

mod ask;
mod conversations;
mod health;
pub(crate) mod problem_details;

pub use ask::{abort, ask};
pub use conversations::{get_conversation, list_conversations, list_messages};
pub use health::{livez, version};
