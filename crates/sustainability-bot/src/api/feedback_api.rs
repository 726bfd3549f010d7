use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::response::{success, ApiResult};
use crate::error::ChatError;
use crate::memory_db::{Feedback, StoredMessage};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message_id: String,
    /// -1 or 1. 0 is the stored "unset" value and cannot be submitted.
    pub user_feedback: i64,
}

/// POST /api/update-feedback
pub async fn update_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<StoredMessage> {
    let feedback = Feedback::from_user_rating(req.user_feedback)?;
    let message = state
        .database
        .messages
        .update_feedback(&req.message_id, feedback)?
        .ok_or_else(|| ChatError::NotFound(format!("no message with id {}", req.message_id)))?;

    info!(message_id = %req.message_id, feedback = feedback.as_i64(), "feedback recorded");
    success("Feedback updated successfully", message)
}
