use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// API Error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant carries meaningful context to help with debugging.
#[derive(Error, Debug)]
pub enum ApiError {
    // Input errors 4xxx
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Policy errors 3xxx
    #[error("{0}")]
    PolicyViolation(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Table not allowed: {0}")]
    TableScope(String),

    // Resource errors 2xxx
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // Database errors 5xxx
    #[error("Query timeout: {0}")]
    Timeout(String),

    #[error("Database unavailable: {0}")]
    DriverUnavailable(String),

    #[error("SQL execution failed: {0}")]
    ExecutionFailed(String),

    // Budget errors 6xxx
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    // Upstream provider errors 7xxx
    #[error("Upstream provider error: {0}")]
    Upstream(String),

    // System errors 9xxx
    #[error("Internal error: {0}")]
    InternalError(String),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Helper to create invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Helper to create validation error
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Helper to create policy violation error
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    /// Helper to create unsupported statement error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Helper to create table scope error
    pub fn table_scope(message: impl Into<String>) -> Self {
        Self::TableScope(message.into())
    }

    /// Helper to create not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound(message.into())
    }

    /// Helper to create query timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Helper to create driver unavailable error
    pub fn driver_unavailable(message: impl Into<String>) -> Self {
        Self::DriverUnavailable(message.into())
    }

    /// Helper to create execution failed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Helper to create budget exceeded error
    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::BudgetExceeded(message.into())
    }

    /// Helper to create upstream provider error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Helper to create internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Stable error code grouped by family
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ResourceNotFound(_) => 2001,

            Self::PolicyViolation(_) => 3001,
            Self::Unsupported(_) => 3002,
            Self::TableScope(_) => 3003,

            Self::InvalidInput(_) => 4001,
            Self::ValidationError(_) => 4002,

            Self::Timeout(_) => 5001,
            Self::DriverUnavailable(_) => 5002,
            Self::ExecutionFailed(_) => 5003,

            Self::BudgetExceeded(_) => 6001,

            Self::Upstream(_) => 7001,

            Self::InternalError(_) => 9001,
            Self::Other(_) => 9001,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            Self::PolicyViolation(_) | Self::TableScope(_) => StatusCode::FORBIDDEN,
            Self::Unsupported(_)
            | Self::InvalidInput(_)
            | Self::ValidationError(_)
            | Self::Timeout(_)
            | Self::ExecutionFailed(_) => StatusCode::BAD_REQUEST,
            Self::DriverUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Reason string surfaced to callers. Policy violations keep their exact
    /// message so downstream clients can match on them.
    pub fn detail(&self) -> String {
        match self {
            Self::PolicyViolation(msg) | Self::Unsupported(msg) | Self::InvalidInput(msg) => {
                msg.clone()
            },
            Self::TableScope(tables) => format!("Table not allowed: {}", tables),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let response = ApiErrorResponse {
            code: self.error_code(),
            message: self.detail(),
            details: None,
        };
        (status, Json(response)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal_error(format!("JSON serialization error: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violation_detail_is_verbatim() {
        let err = ApiError::policy_violation("Write operations are not allowed");
        assert_eq!(err.detail(), "Write operations are not allowed");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn budget_maps_to_429() {
        let err = ApiError::budget_exceeded("limit 10000 KRW reached");
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.error_code(), 6001);
    }

    #[test]
    fn table_scope_detail_carries_table_list() {
        let err = ApiError::table_scope("secret_table");
        assert_eq!(err.detail(), "Table not allowed: secret_table");
    }
}
