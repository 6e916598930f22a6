// Core error taxonomy plus the HTTP mapping used by the server binary
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the tenant isolation core.
///
/// `TenantNotFound` and `TenantSuspended` are deliberately separate: a
/// suspended tenant exists but is blocked, and callers must not retry it as if
/// it were a typo.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant is suspended: {0}")]
    TenantSuspended(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    #[error("No tenant context: {0}")]
    NoContext(String),

    #[error("A tenant context is already active for this unit of work")]
    ContextAlreadyActive,

    #[error("Schema change denied for partition: {0}")]
    SchemaChangeDenied(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl TenancyError {
    /// Stable code used in logs and API payloads
    pub fn code(&self) -> &'static str {
        match self {
            TenancyError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            TenancyError::TenantSuspended(_) => "TENANT_SUSPENDED",
            TenancyError::RoutingError(_) => "ROUTING_ERROR",
            TenancyError::ScopeViolation(_) => "SCOPE_VIOLATION",
            TenancyError::NoContext(_) => "NO_CONTEXT",
            TenancyError::ContextAlreadyActive => "CONTEXT_ALREADY_ACTIVE",
            TenancyError::SchemaChangeDenied(_) => "SCHEMA_CHANGE_DENIED",
            TenancyError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            TenancyError::Store(_) => "STORE_ERROR",
            TenancyError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest { message: String, code: &'static str },

    // 403 Forbidden
    Forbidden { message: String, code: &'static str },

    // 404 Not Found
    NotFound { message: String, code: &'static str },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest { .. } => 400,
            ApiError::Forbidden { .. } => 403,
            ApiError::NotFound { .. } => 404,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest { message, .. } => message,
            ApiError::Forbidden { message, .. } => message,
            ApiError::NotFound { message, .. } => message,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. } => code,
            ApiError::Forbidden { code, .. } => code,
            ApiError::NotFound { code, .. } => code,
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest { message: message.into(), code: "BAD_REQUEST" }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        let code = err.code();
        match err {
            TenancyError::TenantNotFound(_) => ApiError::NotFound {
                message: err.to_string(),
                code,
            },
            TenancyError::TenantSuspended(_)
            | TenancyError::ScopeViolation(_)
            | TenancyError::SchemaChangeDenied(_) => ApiError::Forbidden {
                message: err.to_string(),
                code,
            },
            TenancyError::NoContext(_)
            | TenancyError::InvalidIdentifier(_)
            | TenancyError::ContextAlreadyActive => ApiError::BadRequest {
                message: err.to_string(),
                code,
            },
            TenancyError::RoutingError(msg) => {
                tracing::error!("Routing error: {}", msg);
                ApiError::internal_server_error("Unable to route request to tenant storage")
            }
            TenancyError::Store(msg) => {
                // Don't expose storage internals to clients
                tracing::error!("Store error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            TenancyError::Database(sqlx_err) => {
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_suspended_map_to_distinct_statuses() {
        let missing: ApiError = TenancyError::TenantNotFound("acme".into()).into();
        let blocked: ApiError = TenancyError::TenantSuspended("acme".into()).into();

        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.error_code(), "TENANT_NOT_FOUND");
        assert_eq!(blocked.status_code(), 403);
        assert_eq!(blocked.error_code(), "TENANT_SUSPENDED");
    }

    #[test]
    fn routing_errors_hide_details() {
        let err: ApiError = TenancyError::RoutingError("no storage key".into()).into();
        assert_eq!(err.status_code(), 500);
        assert!(!err.message().contains("storage key"));
    }
}
