//! Application error taxonomy.
//!
//! Errors are grouped the same way decisions are made about them: validation
//! errors are rejected before any record exists, domain errors are policy
//! decisions, external errors come from the payment gateway, infrastructure
//! errors are ours. Every user-visible failure carries a stable machine code;
//! gateway internals are traced but never echoed to end users.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::database::error::DatabaseError;

/// Result type used across the application
pub type AppResult<T> = Result<T, AppError>;

/// Input rejected before any PaymentRecord is created
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("amount must be a positive integer in minor currency units, got {amount}")]
    InvalidAmount { amount: i64 },
    #[error("payer reference '{reference}' is not a valid mobile number")]
    InvalidPayerReference { reference: String },
    #[error("unknown payment purpose '{purpose}'")]
    UnknownPurpose { purpose: String },
    #[error("{message}")]
    MalformedPayload { message: String },
}

/// Business policy violations and reconciliation failures
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("payment {payment_id} not found")]
    PaymentNotFound { payment_id: String },
    #[error("refund rejected: {reason}")]
    RefundPolicy { reason: String },
    #[error("callback correlation id '{correlation_id}' matches no payment")]
    ReconciliationMismatch { correlation_id: String },
    #[error("actor '{actor_id}' with role '{role}' may not perform this operation")]
    Forbidden { actor_id: String, role: String },
}

/// Failures originating at the payment gateway
#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("gateway rejected the request ({code}): {message}")]
    GatewayRejection { code: String, message: String },
    #[error("gateway did not respond within {timeout_secs}s; outcome is unknown")]
    GatewayTimeout { timeout_secs: u64 },
    #[error("callback failed authenticity verification")]
    CallbackAuthenticity,
}

/// Failures in our own plumbing
#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn external(err: ExternalError) -> Self {
        Self::new(AppErrorKind::External(err))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::GatewayTimeout { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(db)) => db.is_retryable(),
            _ => false,
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::Validation(ValidationError::InvalidAmount { .. }) => "INVALID_AMOUNT",
            AppErrorKind::Validation(ValidationError::InvalidPayerReference { .. }) => {
                "INVALID_PAYER_REFERENCE"
            }
            AppErrorKind::Validation(ValidationError::UnknownPurpose { .. }) => "UNKNOWN_PURPOSE",
            AppErrorKind::Validation(ValidationError::MalformedPayload { .. }) => {
                "MALFORMED_PAYLOAD"
            }
            AppErrorKind::Domain(DomainError::PaymentNotFound { .. }) => "PAYMENT_NOT_FOUND",
            AppErrorKind::Domain(DomainError::RefundPolicy { .. }) => "REFUND_POLICY_VIOLATION",
            AppErrorKind::Domain(DomainError::ReconciliationMismatch { .. }) => {
                "UNKNOWN_CORRELATION_ID"
            }
            AppErrorKind::Domain(DomainError::Forbidden { .. }) => "FORBIDDEN",
            AppErrorKind::External(ExternalError::GatewayRejection { .. }) => "GATEWAY_REJECTED",
            AppErrorKind::External(ExternalError::GatewayTimeout { .. }) => "GATEWAY_TIMEOUT",
            AppErrorKind::External(ExternalError::CallbackAuthenticity) => "CALLBACK_UNAUTHENTIC",
            AppErrorKind::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            AppErrorKind::Domain(DomainError::PaymentNotFound { .. }) => StatusCode::NOT_FOUND,
            AppErrorKind::Domain(DomainError::ReconciliationMismatch { .. }) => {
                StatusCode::NOT_FOUND
            }
            AppErrorKind::Domain(DomainError::RefundPolicy { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppErrorKind::Domain(DomainError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            AppErrorKind::External(ExternalError::GatewayRejection { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            AppErrorKind::External(ExternalError::GatewayTimeout { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppErrorKind::External(ExternalError::CallbackAuthenticity) => {
                StatusCode::UNAUTHORIZED
            }
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message safe to return to API consumers.
    fn user_message(&self) -> String {
        match &self.kind {
            // Gateway internals stay in the logs
            AppErrorKind::External(ExternalError::GatewayRejection { code, .. }) => {
                format!("The payment provider rejected the request (code {})", code)
            }
            AppErrorKind::External(ExternalError::GatewayTimeout { .. }) => {
                "The payment provider did not respond in time; the payment status will be resolved shortly".to_string()
            }
            AppErrorKind::Infrastructure(_) => {
                "An internal error occurred. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database(
            err,
        )))
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::validation(err)
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        Self::domain(err)
    }
}

impl From<ExternalError> for AppError {
    fn from(err: ExternalError) -> Self {
        Self::external(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, code = self.code(), "request failed");
        } else {
            warn!(error = %self, code = self.code(), "request rejected");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.user_message(),
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_rejection_hides_internal_message() {
        let err = AppError::external(ExternalError::GatewayRejection {
            code: "500.001.1001".to_string(),
            message: "Unable to lock subscriber, a transaction is already in process".to_string(),
        });
        assert_eq!(err.code(), "GATEWAY_REJECTED");
        assert!(!err.user_message().contains("lock subscriber"));
        assert!(err.user_message().contains("500.001.1001"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = AppError::external(ExternalError::GatewayTimeout { timeout_secs: 30 });
        assert!(err.is_retryable());

        let err = AppError::domain(DomainError::RefundPolicy {
            reason: "amount exceeds refundable remainder".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_refund_policy_maps_to_unprocessable() {
        let err = AppError::domain(DomainError::RefundPolicy {
            reason: "original payment is not completed".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "REFUND_POLICY_VIOLATION");
    }
}
