//! Generation handlers.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::api::{AbortRequest, AskRequest};
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::{GenerationRequest, SessionError, SseTransport};

/// POST /api/ask
///
/// Opens a generation session and streams it as server-sent events:
/// - `created`: the stored user message
/// - `partial`: `{"message_id", "conversation_id", "text", "delta"}` per chunk
/// - `final`: `{"title", "final": true, "conversation", "request_message", "response_message"}`
/// - `error`: `{"message", "response_message"?}`
///
/// Closing the connection before `final` cancels the generation; the partial
/// answer is kept.
pub async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> Response {
    if req.text.trim().is_empty() {
        return problem_details::bad_request("text must not be empty").into_response();
    }
    let Some(endpoint) = state.providers.get(&req.endpoint) else {
        return problem_details::bad_request(format!("unknown endpoint '{}'", req.endpoint))
            .into_response();
    };

    let request = GenerationRequest {
        prompt: req.text,
        model: req.model.unwrap_or_else(|| endpoint.model.clone()),
        sender: req.sender.unwrap_or_else(|| endpoint.sender.clone()),
        endpoint: req.endpoint,
        conversation_id: req.conversation_id,
        parent_message_id: req.parent_message_id,
        override_parent_message_id: req.override_parent_message_id,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
    };

    let (transport, body) = SseTransport::channel();
    let started = match state
        .sessions
        .open(request, endpoint.provider.clone(), transport)
        .await
    {
        Ok(started) => started,
        Err(e) => return session_error(e),
    };

    debug!(
        session_id = %started.session_id,
        conversation_id = %started.conversation_id,
        "Starting SSE stream"
    );

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(body).keep_alive(keep_alive).into_response()
}

/// POST /api/ask/abort
///
/// Stops the running generation of a conversation and returns its final payload.
pub async fn abort(State(state): State<AppState>, Json(req): Json<AbortRequest>) -> Response {
    match state.sessions.cancel(&req.abort_key).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => session_error(e),
    }
}

fn session_error(e: SessionError) -> Response {
    match e {
        SessionError::EmptyPrompt | SessionError::InvalidConversationId(_) => {
            problem_details::bad_request(e.to_string())
        }
        SessionError::AlreadyActive(_) => problem_details::conflict(e.to_string()),
        SessionError::NotFound(_) => problem_details::not_found(e.to_string()),
        SessionError::Provider(_) => {
            error!(error = %e, "Provider request failed");
            problem_details::internal_error("provider request failed")
        }
        SessionError::Persistence(_) => {
            error!(error = %e, "Failed to persist session data");
            problem_details::internal_error("failed to persist session data")
        }
    }
    .into_response()
}
