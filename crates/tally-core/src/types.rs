//! # Domain Types
//!
//! Core domain types used throughout Tally.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DrawerSession  │   │    Movement     │   │  SaleRecord     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  session_id     │   │  id             │       │
//! │  │  drawer_id      │   │  id (idem key)  │   │  business_date  │       │
//! │  │  state          │   │  movement_type  │   │  total_minor    │       │
//! │  │  opening_minor  │   │  amount_minor ± │   │  payments[]     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SessionState   │   │  MovementType   │   │ Classification  │       │
//! │  │  OPEN           │   │  SALE_CASH  ... │   │  EXACT          │       │
//! │  │  CLOSING        │   │  WITHDRAWAL     │   │  SURPLUS        │       │
//! │  │  CLOSED         │   │  AUTO_CORRECTION│   │  SHORTFALL      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Signed Amounts
//! Movements are stored with their sign already applied: a 5.00 expense is
//! `amount_minor = -500`. Callers always submit a positive magnitude and the
//! movement type decides the sign (see [`MovementType::cash_effect`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

/// Category attached to the movement that carries the opening float.
pub const OPENING_FLOAT_CATEGORY: &str = "OPENING_FLOAT";

/// Category attached to engine-generated corrections.
pub const AUTO_CORRECTION_CATEGORY: &str = "RECONCILIATION";

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a drawer session.
///
/// ```text
///   open()          request_close()        finalize (same transaction
///  ───────► OPEN ─────────────────► CLOSING ──────────────────────────► CLOSED
///                                           as reconciliation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Accepting movements.
    Open,
    /// Movement stream frozen, reconciliation in progress.
    Closing,
    /// Terminal. Figures are immutable; only annotations may be appended.
    Closed,
}

impl SessionState {
    /// OPEN and CLOSING sessions both hold the drawer.
    pub const fn is_live(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::Closing)
    }

    /// Database/wire representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Movement Type
// =============================================================================

/// How a movement affects the physical cash in the drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashEffect {
    /// Cash enters the drawer.
    In,
    /// Cash leaves the drawer.
    Out,
    /// Tracked for cross-source validation only.
    NonCash,
}

/// Kind of ledger entry recorded against a drawer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    SaleCash,
    SaleCard,
    SaleTransfer,
    SaleDigital,
    ManualIncome,
    ManualExpense,
    Withdrawal,
    /// Only ever produced by reconciliation during close.
    AutoCorrection,
}

impl MovementType {
    /// All movement types, in declaration order.
    pub const ALL: [MovementType; 8] = [
        MovementType::SaleCash,
        MovementType::SaleCard,
        MovementType::SaleTransfer,
        MovementType::SaleDigital,
        MovementType::ManualIncome,
        MovementType::ManualExpense,
        MovementType::Withdrawal,
        MovementType::AutoCorrection,
    ];

    /// Cash effect of this movement type.
    pub const fn cash_effect(&self) -> CashEffect {
        match self {
            MovementType::SaleCash | MovementType::ManualIncome | MovementType::AutoCorrection => {
                CashEffect::In
            }
            MovementType::ManualExpense | MovementType::Withdrawal => CashEffect::Out,
            MovementType::SaleCard | MovementType::SaleTransfer | MovementType::SaleDigital => {
                CashEffect::NonCash
            }
        }
    }

    /// Applies this type's sign to a positive magnitude.
    ///
    /// Non-cash sales keep a positive sign: they are revenue, they simply do
    /// not count toward expected cash.
    pub fn signed(&self, magnitude: Money) -> Money {
        match self.cash_effect() {
            CashEffect::Out => -magnitude,
            CashEffect::In | CashEffect::NonCash => magnitude,
        }
    }

    /// Whether collaborators may submit this type directly.
    pub const fn is_external(&self) -> bool {
        !matches!(self, MovementType::AutoCorrection)
    }

    /// Payment method this sale type corresponds to, if any.
    pub const fn payment_method(&self) -> Option<PaymentMethod> {
        match self {
            MovementType::SaleCash => Some(PaymentMethod::Cash),
            MovementType::SaleCard => Some(PaymentMethod::Card),
            MovementType::SaleTransfer => Some(PaymentMethod::Transfer),
            MovementType::SaleDigital => Some(PaymentMethod::Digital),
            _ => None,
        }
    }

    /// Database/wire representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementType::SaleCash => "SALE_CASH",
            MovementType::SaleCard => "SALE_CARD",
            MovementType::SaleTransfer => "SALE_TRANSFER",
            MovementType::SaleDigital => "SALE_DIGITAL",
            MovementType::ManualIncome => "MANUAL_INCOME",
            MovementType::ManualExpense => "MANUAL_EXPENSE",
            MovementType::Withdrawal => "WITHDRAWAL",
            MovementType::AutoCorrection => "AUTO_CORRECTION",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MovementType {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::ValidationError::NotAllowed {
                field: "movement type".to_string(),
                allowed: MovementType::ALL
                    .iter()
                    .map(|t| t.as_str().to_string())
                    .collect(),
            })
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// Tender used on a sale, as reported by the order-capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Digital,
}

impl PaymentMethod {
    /// The sale movement type recorded in the drawer ledger for this tender.
    pub const fn movement_type(&self) -> MovementType {
        match self {
            PaymentMethod::Cash => MovementType::SaleCash,
            PaymentMethod::Card => MovementType::SaleCard,
            PaymentMethod::Transfer => MovementType::SaleTransfer,
            PaymentMethod::Digital => MovementType::SaleDigital,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Outcome class of a cash count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// |discrepancy| < ε.
    Exact,
    /// Counted exceeds expected.
    Surplus,
    /// Counted is below expected.
    Shortfall,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Exact => write!(f, "EXACT"),
            Classification::Surplus => write!(f, "SURPLUS"),
            Classification::Shortfall => write!(f, "SHORTFALL"),
        }
    }
}

// =============================================================================
// Drawer Session
// =============================================================================

/// A cashier's work session on one physical drawer.
///
/// Reconciliation columns stay `None` until the session is CLOSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DrawerSession {
    pub id: String,
    pub drawer_id: String,
    pub cashier_id: String,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    /// Opening float in minor units (≥ 0).
    pub opening_minor: i64,
    pub state: SessionState,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Physically counted cash, recorded when close begins.
    pub counted_minor: Option<i64>,
    /// Expected cash after any auto-correction.
    pub expected_minor: Option<i64>,
    /// Final discrepancy (counted − expected) after any auto-correction.
    pub discrepancy_minor: Option<i64>,
    /// Discrepancy as first measured, before auto-correction.
    pub original_discrepancy_minor: Option<i64>,
    /// Amount of the AUTO_CORRECTION movement, if one was appended.
    pub auto_correction_minor: Option<i64>,
    /// Classification of the original discrepancy.
    pub classification: Option<Classification>,
    /// Operation id of the close that owns this session's CLOSING/CLOSED state.
    pub close_operation_id: Option<String>,
}

impl DrawerSession {
    /// Returns the opening float.
    #[inline]
    pub fn opening(&self) -> Money {
        Money::from_minor(self.opening_minor)
    }

    /// Returns the counted amount once close has begun.
    #[inline]
    pub fn counted(&self) -> Option<Money> {
        self.counted_minor.map(Money::from_minor)
    }

    /// Returns the recorded expected amount once closed.
    #[inline]
    pub fn expected(&self) -> Option<Money> {
        self.expected_minor.map(Money::from_minor)
    }

    /// True while the session holds its drawer (OPEN or CLOSING).
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

// =============================================================================
// Movement
// =============================================================================

/// An append-only signed ledger entry against a drawer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Movement {
    /// Idempotency key supplied by the caller.
    pub id: String,
    pub session_id: String,
    pub movement_type: MovementType,
    /// Signed amount in minor units.
    pub amount_minor: i64,
    pub category: String,
    pub description: String,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Movement {
    /// Returns the signed amount.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_minor(self.amount_minor)
    }
}

/// A movement as submitted to the recorder, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovement {
    /// Idempotency key. Re-submitting the same id never creates a second entry.
    pub id: String,
    pub movement_type: MovementType,
    /// Positive magnitude; the type decides the sign.
    pub amount: Money,
    pub category: String,
    pub description: String,
    pub reference: Option<String>,
    pub created_by: String,
}

impl NewMovement {
    /// Signed amount as it will be stored.
    pub fn signed_amount(&self) -> Money {
        self.movement_type.signed(self.amount)
    }
}

// =============================================================================
// Audit Annotation
// =============================================================================

/// Append-only note attached to a session, allowed even after CLOSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AuditAnnotation {
    pub id: String,
    pub session_id: String,
    pub author: String,
    pub note: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sales Feed (from the order-capture collaborator)
// =============================================================================

/// A completed sale as reported by order capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleRecord {
    pub id: String,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    /// Sale total as captured at the till, independent of the tender split.
    pub total_minor: i64,
    pub payments: Vec<SalePayment>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One tender line of a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePayment {
    pub method: PaymentMethod,
    pub amount_minor: i64,
}

/// Sales total for one payment method on one business date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MethodTotal {
    pub method: PaymentMethod,
    pub total_minor: i64,
}

impl MethodTotal {
    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_minor(self.total_minor)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
