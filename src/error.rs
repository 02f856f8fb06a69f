/// Unified error types for the Branchline account service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// A single field-level validation failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Structural or policy validation failures, with field detail
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Login failures. Deliberately carries no cause: unknown email and
    /// wrong password are indistinguishable to the caller.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Tampered or unparseable token
    #[error("Invalid token")]
    InvalidToken,

    /// Well-formed token past its expiry
    #[error("Token expired")]
    ExpiredToken,

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Forbidden(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Email already registered to a live account
    #[error("Email already registered")]
    DuplicateEmail,

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Validation error with a single field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation(vec![FieldError::new(field, message)])
    }
}

/// Convert ServiceError to HTTP response
///
/// This is the single place where service errors become transport status
/// codes. Internal causes are logged with a correlation id and never
/// returned in the body.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServiceError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "validation failed",
                    "fields": fields,
                }),
            ),
            ServiceError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "invalid credentials" }),
            ),
            ServiceError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "invalid token" }),
            ),
            ServiceError::ExpiredToken => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "token expired" }),
            ),
            ServiceError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "message": msg }),
            ),
            ServiceError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not found", "message": msg }),
            ),
            ServiceError::DuplicateEmail => (
                StatusCode::CONFLICT,
                json!({ "error": "email already registered" }),
            ),
            ServiceError::Database(_) | ServiceError::Internal(_) | ServiceError::Io(_) => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(correlation_id, error = %self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal server error",
                        "correlation_id": correlation_id,
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
