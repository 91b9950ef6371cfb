//! Conversation read handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api::{ListConversationsResponse, ListMessagesResponse};
use crate::conversation::is_valid_id;
use crate::handlers::problem_details;
use crate::server::AppState;

/// GET /api/conversations
pub async fn list_conversations(State(state): State<AppState>) -> Response {
    match state.conversations.list_conversations().await {
        Ok(conversations) => Json(ListConversationsResponse { conversations }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list conversations");
            problem_details::internal_error("failed to list conversations").into_response()
        }
    }
}

/// GET /api/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    if !is_valid_id(&conversation_id) {
        return problem_details::not_found("conversation not found").into_response();
    }
    match state.conversations.get_conversation(&conversation_id).await {
        Ok(Some(conversation)) => Json(conversation).into_response(),
        Ok(None) => problem_details::not_found("conversation not found").into_response(),
        Err(e) => {
            error!(conversation_id = %conversation_id, error = %e, "Failed to load conversation");
            problem_details::internal_error("failed to load conversation").into_response()
        }
    }
}

/// GET /api/conversations/{id}/messages
///
/// Latest version of every message. An answer still being generated shows
/// up as its most recent checkpoint (`unfinished: true`).
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    if !is_valid_id(&conversation_id) {
        return problem_details::not_found("conversation not found").into_response();
    }
    match state.conversations.get_conversation(&conversation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return problem_details::not_found("conversation not found").into_response(),
        Err(e) => {
            error!(conversation_id = %conversation_id, error = %e, "Failed to load conversation");
            return problem_details::internal_error("failed to load conversation").into_response();
        }
    }

    match state.messages.load_messages(&conversation_id).await {
        Ok(messages) => Json(ListMessagesResponse { messages }).into_response(),
        Err(e) => {
            error!(conversation_id = %conversation_id, error = %e, "Failed to load messages");
            problem_details::internal_error("failed to load messages").into_response()
        }
    }
}
