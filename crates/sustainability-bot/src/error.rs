//! Error taxonomy shared by the storage, pipeline, scheduler and HTTP layers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Every failure the core can surface to a caller.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    /// Bad, expired or malformed credential. No side effects happened.
    #[error("auth: {0}")]
    Auth(String),

    /// Malformed input, rejected before any storage access.
    #[error("validation: {0}")]
    Validation(String),

    /// Connectivity or constraint failure in the persistence layer.
    #[error("storage: {0}")]
    Storage(String),

    /// Provider failure, including timeouts of the model call.
    #[error("model: {0}")]
    Model(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Usage counters only accumulate.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// The consumer stopped reading a response stream before its terminal record.
    #[error("response stream cancelled: {0}")]
    Cancelled(String),

    /// A required external setting (prompt template, credentials) is missing.
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) | ChatError::InvalidDelta(_) | ChatError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Model(_) => StatusCode::BAD_GATEWAY,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 499: client closed request
            ChatError::Cancelled(_) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    /// Short event name used in logs and the SSE error frame.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Auth(_) => "auth_error",
            ChatError::Validation(_) => "validation_error",
            ChatError::Storage(_) => "storage_error",
            ChatError::Model(_) => "model_error",
            ChatError::NotFound(_) => "not_found",
            ChatError::InvalidDelta(_) => "invalid_delta",
            ChatError::Cancelled(_) => "cancelled",
            ChatError::Config(_) => "config_error",
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ChatError {
    fn from(e: r2d2::Error) -> Self {
        ChatError::Storage(format!("failed to get connection from pool: {}", e))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Storage(format!("corrupt JSON column: {}", e))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Model(format!("model request timed out: {}", e))
        } else {
            ChatError::Model(e.to_string())
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Internal details stay in the logs.
            ChatError::Storage(_) => "An unexpected error occurred.".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(event = self.kind(), error = %self, "request failed");
        } else {
            tracing::warn!(event = self.kind(), error = %self, "request rejected");
        }
        let body = serde_json::json!({
            "success": false,
            "message": message,
            "data": null,
            "error": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(ChatError::Auth("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ChatError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ChatError::Model("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ChatError::Storage("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ChatError::Cancelled("x".into()).status_code().as_u16(), 499);
    }

    #[test]
    fn rusqlite_errors_become_storage_errors() {
        let err: ChatError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, ChatError::Storage(_)));
    }
}
