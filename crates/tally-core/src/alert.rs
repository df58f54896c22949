//! # Financial Alerts
//!
//! Structured, append-only records of financial-integrity outcomes.
//!
//! ## Fingerprints
//! Every alert carries a fingerprint derived from the facts it reports
//! (business date, alert type, figures). The Ledger Store keeps fingerprints
//! unique, so re-running a close replay or a daily scan over unchanged data
//! never produces a second copy of the same alert. Consumers receive alerts
//! at least once and may safely reprocess them.
//!
//! ```text
//!   sha256("2026-10-19|CASH_DISCREPANCY|cash_method=52000|ledger_cash=51500")
//!        │
//!        ▼
//!   "9f2c…"  ← UNIQUE in financial_alerts.fingerprint
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Severity
// =============================================================================

/// Alert severity, ordered from least to most urgent.
///
/// `Low` is the informational level: auto-corrections are reported at `Low`
/// so that they are always visible without paging anyone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(AlertSeverity::Low),
            "MEDIUM" => Some(AlertSeverity::Medium),
            "HIGH" => Some(AlertSeverity::High),
            "CRITICAL" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Alert Type
// =============================================================================

/// What an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// A small under-recorded cash-in gap was closed with an AUTO_CORRECTION.
    AutoCorrectionApplied,
    /// A close found a discrepancy that was not auto-corrected.
    ReconciliationDiscrepancy,
    /// Per-method sales totals disagree with raw sale totals.
    PaymentMethodsMismatch,
    /// Cash sales disagree with the drawer ledger's cash-from-sales.
    CashDiscrepancy,
}

impl AlertType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlertType::AutoCorrectionApplied => "AUTO_CORRECTION_APPLIED",
            AlertType::ReconciliationDiscrepancy => "RECONCILIATION_DISCREPANCY",
            AlertType::PaymentMethodsMismatch => "PAYMENT_METHODS_MISMATCH",
            AlertType::CashDiscrepancy => "CASH_DISCREPANCY",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTO_CORRECTION_APPLIED" => Some(AlertType::AutoCorrectionApplied),
            "RECONCILIATION_DISCREPANCY" => Some(AlertType::ReconciliationDiscrepancy),
            "PAYMENT_METHODS_MISMATCH" => Some(AlertType::PaymentMethodsMismatch),
            "CASH_DISCREPANCY" => Some(AlertType::CashDiscrepancy),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Financial Alert
// =============================================================================

/// A structured financial alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinancialAlert {
    pub id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    /// Business date the alert is about (used for subscription filters).
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Session the alert concerns, for reconciliation alerts.
    pub session_id: Option<String>,
    /// Structured figures; shape depends on `alert_type`.
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
    pub requires_action: bool,
    /// Dedupe key; identical facts produce identical fingerprints.
    pub fingerprint: String,
}

impl FinancialAlert {
    /// Builds an alert; the fingerprint is computed from `fingerprint_parts`.
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        business_date: NaiveDate,
        session_id: Option<String>,
        payload: serde_json::Value,
        requires_action: bool,
        fingerprint_parts: &[&str],
    ) -> Self {
        FinancialAlert {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            business_date,
            alert_type,
            severity,
            session_id,
            payload,
            requires_action,
            fingerprint: fingerprint(business_date, alert_type, fingerprint_parts),
        }
    }
}

/// Computes the dedupe fingerprint `sha256(date|type|part|part…)` as hex.
pub fn fingerprint(business_date: NaiveDate, alert_type: AlertType, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(business_date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(alert_type.as_str().as_bytes());
    for part in parts {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Unit Tests
// =============================================================================
