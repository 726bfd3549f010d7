use axum::extract::{Path, State};
use tracing::debug;

use crate::api::response::{success, ApiResult};
use crate::error::ChatError;
use crate::memory_db::{SessionMessages, StoredMessage};
use crate::shared_state::AppState;

/// GET /api/get-message/:message_id
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> ApiResult<StoredMessage> {
    let message = state
        .database
        .messages
        .get_message(&message_id)?
        .ok_or_else(|| ChatError::NotFound(format!("no message with id {}", message_id)))?;
    success("Message retrieved successfully", message)
}

/// GET /api/messages/:user_id
pub async fn get_user_messages(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<SessionMessages>> {
    let sessions = state.database.messages.get_user_messages(&user_id)?;
    if sessions.is_empty() {
        return Err(ChatError::NotFound(format!("no messages for user {}", user_id)));
    }
    debug!(user_id = %user_id, sessions = sessions.len(), "listed user messages");
    success("Messages retrieved successfully", sessions)
}

/// GET /api/messages
pub async fn get_all_messages(State(state): State<AppState>) -> ApiResult<Vec<SessionMessages>> {
    let sessions = state.database.messages.get_all_messages()?;
    if sessions.is_empty() {
        return Err(ChatError::NotFound("no messages stored yet".to_string()));
    }
    success("Messages retrieved successfully", sessions)
}
