//! Unified error handling for Rollcall Core
//!
//! The taxonomy is closed: every failure the engines can report is one of the
//! variants below. Transport layers map them with [`AppError::status_code`] or
//! return them directly through the axum [`IntoResponse`] impl.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // ---- input rejection ----
    #[error("Invalid or expired credential")]
    InvalidCredential,

    #[error("A pending approval request already exists for this user")]
    DuplicatePending,

    #[error("Email is already registered in this tenant")]
    DuplicateEmail,

    #[error("Password does not meet the policy: {}", .0.join("; "))]
    WeakPassword(Vec<String>),

    #[error("Validation error: {0}")]
    Validation(String),

    // ---- authorization denial ----
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account has been deactivated")]
    AccountDeactivated,

    #[error("Account is awaiting approval")]
    PendingApproval,

    #[error("Company account has been deactivated")]
    TenantDeactivated,

    #[error("Access to this application has not been granted")]
    InsufficientAccess,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cross-tenant access denied")]
    CrossTenant,

    #[error("Credential has been revoked")]
    TokenRevoked,

    // ---- state-machine violation ----
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Approval request is no longer pending")]
    NotPending,

    // ---- infrastructure fault ----
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store operation timed out")]
    StoreTimeout,

    #[error("Store error: {0}")]
    Store(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredential
            | AppError::InvalidCredentials
            | AppError::AccountDeactivated
            | AppError::PendingApproval
            | AppError::TenantDeactivated
            | AppError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::InsufficientAccess | AppError::CrossTenant => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicatePending | AppError::NotPending | AppError::DuplicateEmail => {
                StatusCode::CONFLICT
            }
            AppError::WeakPassword(_) | AppError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::StoreTimeout => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Store(_)
            | AppError::Jwt(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCredential => "invalid_credential",
            AppError::DuplicatePending => "duplicate_pending",
            AppError::DuplicateEmail => "duplicate_email",
            AppError::WeakPassword(_) => "weak_password",
            AppError::Validation(_) => "validation",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::AccountDeactivated => "account_deactivated",
            AppError::PendingApproval => "pending_approval",
            AppError::TenantDeactivated => "tenant_deactivated",
            AppError::InsufficientAccess => "insufficient_access",
            AppError::Forbidden(_) => "forbidden",
            AppError::CrossTenant => "cross_tenant",
            AppError::TokenRevoked => "token_revoked",
            AppError::NotFound(_) => "not_found",
            AppError::NotPending => "not_pending",
            AppError::Database(_) => "database_error",
            AppError::Redis(_) => "cache_error",
            AppError::StoreTimeout => "store_timeout",
            AppError::Store(_) => "store_error",
            AppError::Jwt(_) => "jwt_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether this error is an infrastructure fault rather than a decision.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Redis(_)
                | AppError::StoreTimeout
                | AppError::Store(_)
                | AppError::Jwt(_)
                | AppError::Internal(_)
        )
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_infrastructure() {
            tracing::error!(error = ?self, "Infrastructure fault");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };
        let details = match &self {
            AppError::WeakPassword(errors) => Some(serde_json::json!({ "errors": errors })),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

// Conversion from validation errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::NotFound("User not found".to_string());
        assert_eq!(err.to_string(), "Not found: User not found");
    }

    #[test]
    fn test_error_conversion() {
        let err: AppError = anyhow::anyhow!("Something went wrong").into();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccountDeactivated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::PendingApproval.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("nope".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::InsufficientAccess.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::CrossTenant.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::NotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::DuplicatePending.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotPending.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_weak_password_message_lists_errors() {
        let err = AppError::WeakPassword(vec!["too short".to_string(), "no digit".to_string()]);
        assert_eq!(
            err.to_string(),
            "Password does not meet the policy: too short; no digit"
        );
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_infrastructure_error_hides_details() {
        let response = AppError::Store("connection reset".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
