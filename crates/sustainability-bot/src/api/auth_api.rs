use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::response::{success, ApiResult};
use crate::auth::IssuedToken;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub api_key: String,
}

/// POST /api/generate-bearer-token
pub async fn generate_bearer_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<IssuedToken> {
    let token = state.tokens.issue(&req.api_key)?;
    info!(expires_at = %token.expires_at, "issued bearer token");
    success("Token generated successfully", token)
}
