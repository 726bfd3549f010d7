use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::response::{success, ApiResult};
use crate::error::ChatError;
use crate::shared_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

/// GET /api/get-prompt
pub async fn get_prompt(State(state): State<AppState>) -> ApiResult<PromptBody> {
    let prompt = state
        .prompts
        .load()
        .await?
        .ok_or_else(|| ChatError::NotFound("no prompt has been configured".to_string()))?;
    success("Prompt retrieved successfully", PromptBody { prompt })
}

/// POST /api/update-prompt
pub async fn update_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> ApiResult<PromptBody> {
    state.prompts.save(&body.prompt).await?;
    success("Prompt updated successfully", body)
}
