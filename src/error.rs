//! Error handling module
//!
//! Ledger error taxonomy, store error classification and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error types
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Commit conflict: {0}")]
    CommitConflict(String),

    // Server errors (5xx)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transaction cancelled")]
    Cancelled,

    /// The unit of work failed and so did the rollback that followed it.
    #[error("tx error: {tx_error}, rollback error: {rollback_error}")]
    RollbackFailed {
        #[source]
        tx_error: Box<LedgerError>,
        rollback_error: Box<LedgerError>,
    },

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl LedgerError {
    /// Build a not-found error for a single-row lookup
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Classify a failure to open a transaction.
    ///
    /// Whatever the underlying cause, the store could not start the attempt.
    pub fn store_unavailable(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    /// Pair a unit-of-work failure with the rollback failure that followed it
    pub fn rollback_failed(tx_error: LedgerError, rollback_error: LedgerError) -> Self {
        Self::RollbackFailed {
            tx_error: Box::new(tx_error),
            rollback_error: Box::new(rollback_error),
        }
    }

    /// Check if a fresh attempt could succeed (the caller owns that decision)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommitConflict(_))
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InvalidAmount(_)
                | Self::NotFound { .. }
                | Self::ConstraintViolation(_)
        )
    }
}

/// SQLSTATE codes surfaced as constraint violations
const CONSTRAINT_STATES: &[&str] = &["23502", "23503", "23505", "23514", "22003"];

/// SQLSTATE codes surfaced as commit conflicts
/// (serialization_failure, deadlock_detected, lock_not_available)
const CONFLICT_STATES: &[&str] = &["40001", "40P01", "55P03"];

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            if CONSTRAINT_STATES.contains(&code.as_str()) {
                return Self::ConstraintViolation(db_err.message().to_string());
            }
            if CONFLICT_STATES.contains(&code.as_str()) {
                return Self::CommitConflict(db_err.message().to_string());
            }
        }

        if matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            return Self::StoreUnavailable(err.to_string());
        }

        Self::Database(err)
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            LedgerError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            LedgerError::InvalidAmount(amount) => {
                (StatusCode::BAD_REQUEST, "invalid_amount", Some(amount.to_string()))
            }

            // 404 Not Found
            LedgerError::NotFound { entity, id } => {
                (StatusCode::NOT_FOUND, "not_found", Some(format!("{} {}", entity, id)))
            }

            // 409 Conflict
            LedgerError::CommitConflict(msg) => {
                (StatusCode::CONFLICT, "commit_conflict", Some(msg.clone()))
            }

            // 422 Unprocessable Entity
            LedgerError::ConstraintViolation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "constraint_violation", Some(msg.clone()))
            }

            // 503 / 504
            LedgerError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
            }
            LedgerError::Cancelled => (StatusCode::GATEWAY_TIMEOUT, "cancelled", None),

            // 500 Internal Server Error
            LedgerError::RollbackFailed { .. } => {
                tracing::error!("Rollback failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "rollback_failed", None)
            }
            LedgerError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
