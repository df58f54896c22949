//! # Reconciliation Planner
//!
//! Pure close-time arithmetic: expected cash, discrepancy classification,
//! the auto-correction policy and the alerts a close must emit.
//!
//! The Ledger Store runs this planner *inside* its close transaction, so the
//! figures it computes and the AUTO_CORRECTION it asks for are committed
//! together with the CLOSED transition or not at all.
//!
//! ## Decision Table
//! ```text
//! ┌──────────────────────────────┬──────────────────┬─────────────────────────┐
//! │ discrepancy d = counted − exp│ correction       │ alert                   │
//! ├──────────────────────────────┼──────────────────┼─────────────────────────┤
//! │ d = 0                        │ none             │ none                    │
//! │ 0 < d < limit                │ AUTO_CORRECTION d│ AUTO_CORRECTION_APPLIED │
//! │                              │                  │ LOW, no action          │
//! │ |d| ≥ limit                  │ none             │ RECONCILIATION_DISCREP. │
//! │                              │                  │ CRITICAL, action        │
//! │ −limit < d < 0, |d| ≥ ε      │ none             │ RECONCILIATION_DISCREP. │
//! │                              │                  │ MEDIUM, no action       │
//! │ −ε < d < 0                   │ none             │ none (EXACT)            │
//! └──────────────────────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! Shortfalls are never corrected: counted < expected may mean lost cash.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ts_rs::TS;

use crate::alert::{AlertSeverity, AlertType, FinancialAlert};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{
    CashEffect, Classification, DrawerSession, Movement, MovementType, NewMovement,
    SessionState, AUTO_CORRECTION_CATEGORY,
};
use crate::{DEFAULT_AUTO_CORRECT_LIMIT, DEFAULT_TOLERANCE_EPSILON};

// =============================================================================
// Policy
// =============================================================================

/// Thresholds that drive classification and auto-correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    /// |d| < epsilon is EXACT.
    pub tolerance_epsilon: Money,
    /// Surpluses strictly below this are auto-corrected; |d| at or above it
    /// is CRITICAL.
    pub auto_correct_limit: Money,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        ReconciliationPolicy {
            tolerance_epsilon: Money::from_minor(DEFAULT_TOLERANCE_EPSILON),
            auto_correct_limit: Money::from_minor(DEFAULT_AUTO_CORRECT_LIMIT),
        }
    }
}

impl ReconciliationPolicy {
    /// Classifies a signed discrepancy. The ε boundary is exclusive.
    pub fn classify(&self, discrepancy: Money) -> Classification {
        if discrepancy.abs() < self.tolerance_epsilon {
            Classification::Exact
        } else if discrepancy.is_positive() {
            Classification::Surplus
        } else {
            Classification::Shortfall
        }
    }

    /// Only under-recorded cash-in outside ε and below the limit is eligible.
    pub fn is_auto_correctable(&self, discrepancy: Money) -> bool {
        discrepancy.is_positive()
            && discrepancy >= self.tolerance_epsilon
            && discrepancy < self.auto_correct_limit
    }

    /// |d| at or above the limit requires mandatory audit. An EXACT count
    /// is never critical, whatever the limit.
    pub fn is_critical(&self, discrepancy: Money) -> bool {
        self.classify(discrepancy) != Classification::Exact
            && discrepancy.abs() >= self.auto_correct_limit
    }
}

// =============================================================================
// Expected Cash
// =============================================================================

/// The single expected-cash algorithm.
///
/// Sums the signed amounts of every cash-affecting movement. The opening
/// float is itself a MANUAL_INCOME movement, so this equals
/// `opening + Σ cash-in − Σ cash-out`. Non-cash sales are skipped.
/// Returns `None` on i64 overflow.
///
/// ```rust
/// use tally_core::reconciliation::compute_expected;
/// assert_eq!(compute_expected(&[]).map(|m| m.minor()), Some(0));
/// ```
pub fn compute_expected(movements: &[Movement]) -> Option<Money> {
    movements
        .iter()
        .filter(|m| m.movement_type.cash_effect() != CashEffect::NonCash)
        .try_fold(Money::zero(), |acc, m| acc.checked_add(m.amount()))
}

// =============================================================================
// Reconciliation Result
// =============================================================================

/// Full breakdown of a close, returned to the caller and persisted on the
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReconciliationResult {
    pub session_id: String,
    pub operation_id: String,
    /// Expected cash after any auto-correction.
    pub expected: Money,
    pub counted: Money,
    /// Final discrepancy, zero when auto-corrected.
    pub discrepancy: Money,
    /// Discrepancy as first measured.
    pub original_discrepancy: Money,
    /// Classification of the original discrepancy.
    pub classification: Classification,
    pub auto_correction: Option<Money>,
    /// Original discrepancy in basis points of the pre-correction expected.
    pub discrepancy_bps: Option<i64>,
    /// Set when |original discrepancy| ≥ limit.
    pub requires_audit: bool,
    #[ts(as = "String")]
    pub closed_at: DateTime<Utc>,
    pub alerts: Vec<FinancialAlert>,
}

impl ReconciliationResult {
    /// Expected cash as the ledger stood before any correction.
    pub fn ledger_expected(&self) -> Money {
        self.counted.saturating_sub(self.original_discrepancy)
    }

    /// Rebuilds the result of an already CLOSED session, for replays.
    pub fn from_closed_session(
        session: &DrawerSession,
        alerts: Vec<FinancialAlert>,
    ) -> CoreResult<Self> {
        let incomplete = || CoreError::InvalidState {
            session_id: session.id.clone(),
            state: session.state,
            operation: "rebuild reconciliation result".to_string(),
        };

        if session.state != SessionState::Closed {
            return Err(incomplete());
        }

        let expected = session.expected_minor.ok_or_else(incomplete)?;
        let counted = session.counted_minor.ok_or_else(incomplete)?;
        let discrepancy = session.discrepancy_minor.ok_or_else(incomplete)?;
        let original = session.original_discrepancy_minor.ok_or_else(incomplete)?;
        let classification = session.classification.ok_or_else(incomplete)?;
        let operation_id = session.close_operation_id.clone().ok_or_else(incomplete)?;
        let closed_at = session.closed_at.ok_or_else(incomplete)?;

        let counted = Money::from_minor(counted);
        let original_discrepancy = Money::from_minor(original);
        let ledger_expected = counted.saturating_sub(original_discrepancy);
        let requires_audit = alerts.iter().any(|a| a.requires_action);

        Ok(ReconciliationResult {
            session_id: session.id.clone(),
            operation_id,
            expected: Money::from_minor(expected),
            counted,
            discrepancy: Money::from_minor(discrepancy),
            original_discrepancy,
            classification,
            auto_correction: session.auto_correction_minor.map(Money::from_minor),
            discrepancy_bps: original_discrepancy.ratio_bps(ledger_expected),
            requires_audit,
            closed_at,
            alerts,
        })
    }
}

// =============================================================================
// Close Planning
// =============================================================================

/// Movement id reserved for a session's single auto-correction.
pub fn auto_correction_id(session_id: &str) -> String {
    format!("{session_id}:auto-correction")
}

/// Builds the AUTO_CORRECTION movement for a planned correction.
pub fn auto_correction_movement(result: &ReconciliationResult) -> Option<NewMovement> {
    result.auto_correction.map(|amount| NewMovement {
        id: auto_correction_id(&result.session_id),
        movement_type: MovementType::AutoCorrection,
        amount,
        category: AUTO_CORRECTION_CATEGORY.to_string(),
        description: format!(
            "Auto-correction of {} surplus at close {}",
            amount, result.operation_id
        ),
        reference: Some(result.operation_id.clone()),
        created_by: "reconciliation".to_string(),
    })
}

/// Plans the close of a CLOSING session.
///
/// `movements` must be the session's complete, frozen movement stream.
/// The returned result already contains the alerts to persist and, when
/// `auto_correction` is set, the caller must append the movement returned by
/// [`auto_correction_movement`] in the same transaction.
pub fn plan_close(
    session: &DrawerSession,
    operation_id: &str,
    counted: Money,
    movements: &[Movement],
    policy: &ReconciliationPolicy,
    closed_at: DateTime<Utc>,
) -> CoreResult<ReconciliationResult> {
    if session.state != SessionState::Closing {
        return Err(CoreError::InvalidState {
            session_id: session.id.clone(),
            state: session.state,
            operation: "reconcile".to_string(),
        });
    }

    let ledger_expected = compute_expected(movements).ok_or_else(|| CoreError::LedgerOverflow {
        session_id: session.id.clone(),
    })?;

    let original_discrepancy =
        counted
            .checked_sub(ledger_expected)
            .ok_or_else(|| CoreError::LedgerOverflow {
                session_id: session.id.clone(),
            })?;
    let classification = policy.classify(original_discrepancy);
    let discrepancy_bps = original_discrepancy.ratio_bps(ledger_expected);
    let business_date = session.opened_at.date_naive();

    let mut result = ReconciliationResult {
        session_id: session.id.clone(),
        operation_id: operation_id.to_string(),
        expected: ledger_expected,
        counted,
        discrepancy: original_discrepancy,
        original_discrepancy,
        classification,
        auto_correction: None,
        discrepancy_bps,
        requires_audit: false,
        closed_at,
        alerts: Vec::new(),
    };

    if policy.is_auto_correctable(original_discrepancy) {
        result.auto_correction = Some(original_discrepancy);
        result.expected = counted;
        result.discrepancy = Money::zero();
        result
            .alerts
            .push(close_alert(&result, business_date, AlertType::AutoCorrectionApplied));
    } else if policy.is_critical(original_discrepancy) {
        result.requires_audit = true;
        result
            .alerts
            .push(close_alert(&result, business_date, AlertType::ReconciliationDiscrepancy));
    } else if classification != Classification::Exact {
        result
            .alerts
            .push(close_alert(&result, business_date, AlertType::ReconciliationDiscrepancy));
    }

    Ok(result)
}

fn close_alert(
    result: &ReconciliationResult,
    business_date: NaiveDate,
    alert_type: AlertType,
) -> FinancialAlert {
    let (severity, requires_action) = match alert_type {
        AlertType::AutoCorrectionApplied => (AlertSeverity::Low, false),
        _ if result.requires_audit => (AlertSeverity::Critical, true),
        _ => (AlertSeverity::Medium, false),
    };

    let payload = json!({
        "session_id": result.session_id,
        "operation_id": result.operation_id,
        "expected_minor": result.ledger_expected().minor(),
        "counted_minor": result.counted.minor(),
        "discrepancy_minor": result.original_discrepancy.minor(),
        "discrepancy_bps": result.discrepancy_bps,
        "classification": result.classification,
        "auto_correction_minor": result.auto_correction.map(|m| m.minor()),
    });

    let counted = result.counted.minor().to_string();
    let expected = result.ledger_expected().minor().to_string();
    FinancialAlert::new(
        alert_type,
        severity,
        business_date,
        Some(result.session_id.clone()),
        payload,
        requires_action,
        &[&result.session_id, &result.operation_id, &counted, &expected],
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
