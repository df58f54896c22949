//! # Engine Error Types
//!
//! What collaborators see when a drawer operation fails.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Rejected       │  │   Transient     │  │     Degraded            │ │
//! │  │  (never retried)│  │  (retried when  │  │  (caller queues and     │ │
//! │  │                 │  │   idempotent)   │  │   replays later)        │ │
//! │  │  Validation     │  │  TransientIo    │  │  ServiceDegraded        │ │
//! │  │  InvalidState   │  │                 │  │  RetryWithOperationId   │ │
//! │  │  NotFound       │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reconciliation discrepancy is never an error: it is reported in the
//! close result and as a FinancialAlert.

use std::time::Duration;
use tally_core::{CoreError, ValidationError};
use tally_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Rejected immediately
    // =========================================================================
    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Operation invalid for the session's current state, or an idempotency
    /// key replayed with different arguments.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Session, drawer or record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    // =========================================================================
    // Transient
    // =========================================================================
    /// Ledger Store unreachable, busy or timed out.
    #[error("Ledger store unavailable: {0}")]
    TransientIo(String),

    // =========================================================================
    // Degraded
    // =========================================================================
    /// Circuit breaker is open; queue the request and replay later.
    #[error("Ledger store degraded, retry after {retry_after:?}")]
    ServiceDegraded { retry_after: Duration },

    /// A close failed transiently; replay it with the same operation id.
    #[error("Close did not complete ({reason}); retry with operation id {operation_id}")]
    RetryWithOperationId {
        operation_id: String,
        reason: String,
    },

    // =========================================================================
    // Other
    // =========================================================================
    /// Work was cancelled before it finished.
    #[error("Cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True only for transient store failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientIo(_))
    }

    /// True when the caller should queue the request and replay it.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            EngineError::ServiceDegraded { .. } | EngineError::RetryWithOperationId { .. }
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => EngineError::Validation(v),
            CoreError::LedgerOverflow { .. } => EngineError::Internal(err.to_string()),
            CoreError::InvalidState { .. }
            | CoreError::DrawerNotOpen { .. }
            | CoreError::DrawerAlreadyOpen { .. }
            | CoreError::OperationMismatch { .. }
            | CoreError::BalanceLimit { .. } => EngineError::InvalidState(err.to_string()),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            return EngineError::TransientIo(err.to_string());
        }
        match err {
            DbError::Rule(core) => core.into(),
            DbError::NotFound { entity, id } => EngineError::NotFound(format!("{entity} {id}")),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
