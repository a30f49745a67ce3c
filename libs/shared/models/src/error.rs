use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level failure taxonomy shared by every cell. Each variant maps
/// to exactly one HTTP status and one machine-readable kind; internal detail
/// stays server-side in the logs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "auth_error",
            AppError::Forbidden(_) => "authorization_error",
            AppError::NotFound(_) => "resource_not_found",
            AppError::BadRequest(_) => "validation_error",
            AppError::Conflict(_) => "slot_conflict",
            AppError::Unavailable(_) => "professional_unavailable",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::RateLimit(_) => "rate_limit_exceeded",
            AppError::Internal(_) | AppError::Database(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg)
            | AppError::Unavailable(msg)
            | AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimit(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            // Store failures are logged in full below; callers get a generic line.
            AppError::Internal(_) | AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        tracing::error!("Error: {}: {}", status, self);

        let body = Json(json!({
            "error_kind": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
