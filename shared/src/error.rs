//! Unified error system
//!
//! Structured error codes with HTTP mapping. Request handlers return
//! [`AppError`]; consumer loops never surface these (they log and continue).

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Error code identifying the class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    InvalidRequest,
    NotFound,
    AlreadyExists,
    DatabaseError,
    InternalError,
    NotReady,
}

impl ErrorCode {
    /// Default human-readable message for the code
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::NotReady => "Service not ready",
        }
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Application error with structured code and details
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    /// Optional structured context (field errors, resource ids)
    pub details: Option<HashMap<String, Value>>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    // ==================== Convenience constructors ====================

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, msg)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{} not found", r))
            .with_detail("resource", r)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::AlreadyExists, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    pub fn not_ready() -> Self {
        Self::new(ErrorCode::NotReady)
    }
}

/// Wire shape of an error response
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, Value>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        // 5xx details stay in the log; the response never leaks internals
        let (message, details) = if status.is_server_error() {
            tracing::error!(code = ?self.code, error = %self.message, "Request failed");
            (self.code.message().to_string(), None)
        } else {
            (self.message, self.details)
        };
        let body = Json(ErrorBody {
            code: self.code,
            message,
            details,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            AppError::validation("bad").code.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("ticket").code.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::conflict("dup").code.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::database("boom").code.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn details_accumulate() {
        let err = AppError::not_found("ticket").with_detail("id", "42");
        let details = err.details.unwrap();
        assert_eq!(details.get("resource").unwrap(), "ticket");
        assert_eq!(details.get("id").unwrap(), "42");
    }
}
