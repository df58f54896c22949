//! # tally-core: Pure Cash-Drawer Logic for Tally
//!
//! This crate holds the arithmetic and rules of the drawer ledger as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Collaborators (order capture, reporting, daemon)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │  tally-engine: DrawerService, ReconciliationEngine,             │   │
//! │  │  ConsistencyValidator, AlertSink, Resilient store wrapper       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────────┐ ┌─────────────┐  │   │
//! │  │   │  money   │ │  types   │ │reconciliation│ │ consistency │  │   │
//! │  │   │  Money   │ │ Session  │ │  plan_close  │ │ check_daily │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────────┘ └─────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                tally-db (SQLite Ledger Store)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer minor-unit arithmetic
//! - [`types`] - Sessions, movements, sales feed types
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation and amount parsing
//! - [`alert`] - Financial alerts and fingerprints
//! - [`reconciliation`] - Expected cash, classification, auto-correction policy
//! - [`consistency`] - Cross-source daily comparisons
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::{Money, ReconciliationPolicy, Classification};
//!
//! let policy = ReconciliationPolicy::default();
//! assert_eq!(policy.classify(Money::from_minor(50)), Classification::Surplus);
//! assert!(policy.is_auto_correctable(Money::from_minor(50)));
//! assert!(!policy.is_auto_correctable(Money::from_minor(-50)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod alert;
pub mod consistency;
pub mod error;
pub mod money;
pub mod reconciliation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use alert::{AlertSeverity, AlertType, FinancialAlert};
pub use consistency::{ConsistencyReport, DailyFigures, Mismatch};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use reconciliation::{ReconciliationPolicy, ReconciliationResult};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default auto-correction limit in minor units (1.00).
///
/// Surpluses strictly below this are corrected; any |discrepancy| at or
/// above it is CRITICAL.
pub const DEFAULT_AUTO_CORRECT_LIMIT: i64 = 100;

/// Default tolerance in minor units; |discrepancy| below it is EXACT.
pub const DEFAULT_TOLERANCE_EPSILON: i64 = 1;
