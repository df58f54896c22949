//! # Cross-Source Consistency Checks
//!
//! Compares independently derived daily aggregates:
//!
//! ```text
//!   per-method totals ──Σ──► method_sum ──┐
//!                                          ├── PAYMENT_METHODS_MISMATCH
//!   raw sale totals ───────► raw_total ───┘
//!
//!   CASH method total ─────► cash_method ─┐
//!                                          ├── CASH_DISCREPANCY
//!   drawer SALE_CASH ──────► ledger_cash ─┘
//! ```
//!
//! A pair mismatches when |left − right| ≥ ε. Each mismatch becomes one
//! fingerprinted alert, so re-running a check over unchanged data yields the
//! same fingerprints and the store drops the duplicates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use ts_rs::TS;

use crate::alert::{AlertSeverity, AlertType, FinancialAlert};
use crate::money::Money;
use crate::types::{MethodTotal, PaymentMethod};

/// Aggregates gathered for one business date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DailyFigures {
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub method_totals: Vec<MethodTotal>,
    pub raw_sales_total: Money,
    pub ledger_cash_from_sales: Money,
}

impl DailyFigures {
    /// Σ over every payment method, saturating at the i64 bounds.
    pub fn method_sum(&self) -> Money {
        self.method_totals
            .iter()
            .map(MethodTotal::total)
            .fold(Money::zero(), Money::saturating_add)
    }

    /// Cash method total, zero when no cash sales were captured.
    pub fn cash_method_total(&self) -> Money {
        self.method_totals
            .iter()
            .filter(|t| t.method == PaymentMethod::Cash)
            .map(MethodTotal::total)
            .fold(Money::zero(), Money::saturating_add)
    }
}

/// One disagreement between two sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Mismatch {
    pub kind: AlertType,
    pub left_label: String,
    pub left: Money,
    pub right_label: String,
    pub right: Money,
    /// left − right, saturated at the i64 bounds
    pub difference: Money,
}

impl Mismatch {
    fn new(kind: AlertType, left_label: &str, left: Money, right_label: &str, right: Money) -> Self {
        Mismatch {
            kind,
            left_label: left_label.to_string(),
            left,
            right_label: right_label.to_string(),
            right,
            difference: left.saturating_sub(right),
        }
    }

    /// Builds the fingerprinted alert for this mismatch.
    pub fn to_alert(&self, business_date: NaiveDate) -> FinancialAlert {
        let payload = json!({
            "business_date": business_date.to_string(),
            self.left_label.as_str(): self.left.minor(),
            self.right_label.as_str(): self.right.minor(),
            "difference_minor": self.difference.minor(),
        });
        let left = format!("{}={}", self.left_label, self.left.minor());
        let right = format!("{}={}", self.right_label, self.right.minor());

        FinancialAlert::new(
            self.kind,
            AlertSeverity::High,
            business_date,
            None,
            payload,
            true,
            &[&left, &right],
        )
    }
}

/// Result of a daily check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsistencyReport {
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub consistent: bool,
    pub mismatches: Vec<Mismatch>,
    pub figures: DailyFigures,
}

/// Runs both comparisons for one day.
pub fn check_daily(figures: DailyFigures, epsilon: Money) -> ConsistencyReport {
    let mut mismatches = Vec::new();

    let method_sum = figures.method_sum();
    if method_sum.saturating_sub(figures.raw_sales_total).abs() >= epsilon {
        mismatches.push(Mismatch::new(
            AlertType::PaymentMethodsMismatch,
            "method_total_minor",
            method_sum,
            "raw_total_minor",
            figures.raw_sales_total,
        ));
    }

    let cash = figures.cash_method_total();
    if cash.saturating_sub(figures.ledger_cash_from_sales).abs() >= epsilon {
        mismatches.push(Mismatch::new(
            AlertType::CashDiscrepancy,
            "cash_method_minor",
            cash,
            "ledger_cash_minor",
            figures.ledger_cash_from_sales,
        ));
    }

    ConsistencyReport {
        business_date: figures.business_date,
        consistent: mismatches.is_empty(),
        mismatches,
        figures,
    }
}
