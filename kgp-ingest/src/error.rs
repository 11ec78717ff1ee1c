//! Error types for kgp-ingest
//!
//! Domain errors from the governance workflow and migration engine are mapped
//! onto HTTP statuses here; handlers only ever return [`ApiError`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::admission::{DuplicateError, ValidationError};
use crate::governance::GovernanceError;
use crate::migration::EngineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Field validation failed (422)
    #[error(transparent)]
    Validation(ValidationError),

    /// Near-duplicate of existing content (409)
    #[error(transparent)]
    Duplicate(DuplicateError),

    /// Operation illegal in the current state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor lacks a capability or authorship (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// kgp-common error
    #[error("Common error: {0}")]
    Common(#[from] kgp_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Validation(ref err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
                err.to_string(),
                Some(json!({ "fields": err.violations })),
            ),
            ApiError::Duplicate(ref err) => (
                StatusCode::CONFLICT,
                "DUPLICATE",
                err.to_string(),
                Some(json!({
                    "score": err.score,
                    "threshold": err.threshold,
                    "matches": err.matches,
                })),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "INVALID_STATE", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
            ApiError::Common(ref err) => {
                error!("Common error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let (Some(Value::Object(extra)), Value::Object(fields)) = (details, &mut error) {
            fields.extend(extra);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::NotFound(id) => ApiError::NotFound(format!("content {}", id)),
            GovernanceError::Validation(e) => ApiError::Validation(e),
            GovernanceError::Duplicate(e) => ApiError::Duplicate(e),
            GovernanceError::InvalidTransition(e) => ApiError::Conflict(e.to_string()),
            GovernanceError::Forbidden(msg) => ApiError::Forbidden(msg),
            GovernanceError::Gate(e) => ApiError::Internal(e.to_string()),
            GovernanceError::Store(e) => ApiError::Common(e),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(id) => ApiError::NotFound(format!("migration job {}", id)),
            EngineError::InvalidState(e) => ApiError::Conflict(e.to_string()),
            EngineError::Validation(e) => ApiError::Validation(e),
            EngineError::Forbidden(msg) => ApiError::Forbidden(msg),
            EngineError::Registry(e) => ApiError::Internal(format!("job registry unavailable: {}", e)),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
