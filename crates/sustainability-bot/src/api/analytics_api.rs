use axum::extract::State;

use crate::api::response::{success, ApiResult};
use crate::memory_db::Analytics;
use crate::shared_state::AppState;

/// GET /api/analytics
pub async fn get_analytics(State(state): State<AppState>) -> ApiResult<Analytics> {
    let analytics = state.database.messages.get_analytics()?;
    success("Analytics retrieved successfully", analytics)
}
