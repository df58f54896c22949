//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Drawer lifecycle rule violations               │
//! │  └── ValidationError  - Malformed input, never retried                 │
//! │                                                                         │
//! │  tally-db errors                                                       │
//! │  └── DbError          - Ledger Store failures (transient or not)       │
//! │                                                                         │
//! │  tally-engine errors                                                   │
//! │  └── EngineError      - What collaborators see                         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reconciliation discrepancy is deliberately absent from this hierarchy:
//! it is a business outcome carried in `ReconciliationResult`, not an error.

use thiserror::Error;

use crate::types::SessionState;

// =============================================================================
// Core Error
// =============================================================================

/// Drawer lifecycle rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The operation is not valid for the session's current state.
    ///
    /// ## When This Occurs
    /// - Recording a movement after close has begun
    /// - Closing a session that is already CLOSED under another operation
    #[error("Session {session_id} is {state}, cannot {operation}")]
    InvalidState {
        session_id: String,
        state: SessionState,
        operation: String,
    },

    /// No OPEN session exists for the drawer.
    #[error("Drawer {drawer_id} has no open session")]
    DrawerNotOpen { drawer_id: String },

    /// A session is already OPEN or CLOSING for the drawer.
    #[error("Drawer {drawer_id} already has a live session")]
    DrawerAlreadyOpen { drawer_id: String },

    /// An operation id was replayed with different arguments.
    #[error("Operation {operation_id} was already used with different arguments")]
    OperationMismatch { operation_id: String },

    /// The movement would push the session's cash balance past
    /// `MAX_AMOUNT_MINOR`.
    #[error("Movement {movement_id} would take session {session_id} past the cash balance limit")]
    BalanceLimit {
        session_id: String,
        movement_id: String,
    },

    /// Arithmetic overflow while summing the ledger.
    #[error("Ledger overflow while summing session {session_id}")]
    LedgerOverflow { session_id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are rejected immediately and never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, malformed amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
