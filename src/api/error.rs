//! HTTP error responses.
//!
//! Error bodies follow the shapes clients already parse:
//! `{"error": "..."}` for single failures, `{"errors": [...]}` for record
//! validation, and an empty object for an unknown accommodation on `book`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::engine::EngineError;
use crate::intake::IntakeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    /// 404 with an empty JSON object.
    #[error("not found")]
    NotFoundEmpty,
    #[error("{0}")]
    Unprocessable(String),
    #[error("{}", .0.join(", "))]
    Invalid(Vec<String>),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{entity} not found"))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::Invalid(vec![message.into()])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::NotFoundEmpty => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) | ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound { entity, .. } => ApiError::not_found(&capitalize(entity)),
            EngineError::Overlap { .. } | EngineError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            EngineError::WalError(_) => ApiError::Internal(e.to_string()),
            EngineError::Validation(message) => ApiError::Invalid(vec![message]),
            EngineError::AlreadyExists(_)
            | EngineError::InvalidRange { .. }
            | EngineError::DuplicateName(_)
            | EngineError::LimitExceeded(_) => ApiError::invalid(e.to_string()),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::NotFound(_) => ApiError::NotFoundEmpty,
            other => ApiError::Unprocessable(other.to_string()),
        }
    }
}

/// Unreadable request bodies answer 422 with the parser's message.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "internal server error");
        }
        let body = match self {
            ApiError::NotFoundEmpty => json!({}),
            ApiError::Invalid(errors) => json!({ "errors": errors }),
            ApiError::NotFound(message)
            | ApiError::Unprocessable(message)
            | ApiError::Conflict(message)
            | ApiError::Internal(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
