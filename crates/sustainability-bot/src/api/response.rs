//! The `{success, message, data, error}` envelope every JSON route answers with.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, crate::error::ChatError>;

pub fn success<T: Serialize>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
        error: None,
    }))
}
