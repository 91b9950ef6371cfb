//! Chatrelay - a streaming chat-completion relay with cancellable, checkpointed
//! generation sessions.

pub mod api;
pub mod background;
pub mod build_info;
pub mod config;
pub mod conversation;
pub mod handlers;
pub mod llm;
pub mod server;
pub mod session;
pub mod sse_parser;
pub mod store;
pub mod sync;
pub mod title;
