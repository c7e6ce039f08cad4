use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Clients match on these,
// never on the human-readable message string.

/// Stable error code constants.
///
/// Clients should match on `code` from `{"code": "NOT_FOUND", "message": "..."}`.
/// Codes never change; messages may be reworded.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INSUFFICIENT_STOCK: &str = "INSUFFICIENT_STOCK";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const INTERNAL: &str = "INTERNAL";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified service error type used across all modules.
///
/// Each variant maps to a stable error code (see [`error_code`]) and an
/// HTTP status code. The JSON response always includes both:
///
/// ```json
/// {"code": "INSUFFICIENT_STOCK", "message": "cycle 'abc' holds 50, cannot remove 100"}
/// ```
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Pond, cycle, movement or record does not exist. HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// Lock contention or a concurrent append on the same ledger. HTTP 409.
    ///
    /// Retryable: the caller may resubmit with the same idempotency token.
    #[error("{0}")]
    Conflict(String),

    /// Malformed or policy-violating input. HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// The movement would drive a balance below zero. HTTP 422.
    #[error("{0}")]
    InsufficientStock(String),

    /// Operation is illegal for the cycle's lifecycle state. HTTP 409.
    #[error("{0}")]
    InvalidState(String),

    /// Missing or invalid authentication credentials. HTTP 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but lacks required permission. HTTP 403.
    #[error("{0}")]
    PermissionDenied(String),

    /// Storage backend failure. HTTP 500.
    #[error("{0}")]
    Storage(String),

    /// Unexpected internal error. HTTP 500.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Conflict(_) => error_code::CONFLICT,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::InsufficientStock(_) => error_code::INSUFFICIENT_STOCK,
            ServiceError::InvalidState(_) => error_code::INVALID_STATE,
            ServiceError::Unauthorized(_) => error_code::UNAUTHENTICATED,
            ServiceError::PermissionDenied(_) => error_code::PERMISSION_DENIED,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InvalidState(_) => StatusCode::CONFLICT,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if self.is_retryable() {
            body["retryable"] = serde_json::Value::Bool(true);
        }
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_code_and_status() {
        let table = [
            (ServiceError::NotFound("x".into()), "NOT_FOUND", StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()), "CONFLICT", StatusCode::CONFLICT),
            (ServiceError::Validation("x".into()), "VALIDATION_FAILED", StatusCode::BAD_REQUEST),
            (
                ServiceError::InsufficientStock("x".into()),
                "INSUFFICIENT_STOCK",
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ServiceError::InvalidState("x".into()), "INVALID_STATE", StatusCode::CONFLICT),
            (ServiceError::Unauthorized("x".into()), "UNAUTHENTICATED", StatusCode::UNAUTHORIZED),
            (ServiceError::PermissionDenied("x".into()), "PERMISSION_DENIED", StatusCode::FORBIDDEN),
            (ServiceError::Storage("x".into()), "STORAGE_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
            (ServiceError::Internal("x".into()), "INTERNAL", StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, code, status) in table {
            assert_eq!(err.error_code(), code, "{err:?}");
            assert_eq!(err.status_code(), status, "{err:?}");
        }
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(ServiceError::Conflict("lock".into()).is_retryable());
        assert!(!ServiceError::InvalidState("closed".into()).is_retryable());
        assert!(!ServiceError::InsufficientStock("x".into()).is_retryable());
    }

    #[test]
    fn response_carries_status() {
        let resp = ServiceError::InsufficientStock("cycle c1 holds 50".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let resp = ServiceError::Conflict("busy".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn display_is_just_the_message() {
        assert_eq!(ServiceError::NotFound("cycle 123".into()).to_string(), "cycle 123");
        assert_eq!(ServiceError::InvalidState("closed".into()).to_string(), "closed");
    }
}
