//! LLM error types.

use thiserror::Error;

/// Errors raised while talking to a model provider.
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered with something that is not a usable completion.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The provider reported a failure inside an open stream.
    #[error("provider stream error: {0}")]
    Stream(String),
}
