//! # Cross-Source Consistency Validator
//!
//! Read-only daily comparison of independently derived totals.
//!
//! ```text
//!   sale_payments ─ Σ by method ─┬─ Σ all ──── vs ──── Σ sales.total  → PAYMENT_METHODS_MISMATCH
//!                                └─ CASH ───── vs ──── Σ SALE_CASH    → CASH_DISCREPANCY
//!                                                     (drawer ledger)
//! ```
//!
//! Each date is one partition: gather, compare, publish. Alerts are
//! fingerprinted on date, type and both figures, so re-running on unchanged
//! data publishes nothing new. A range scan checks its cancellation token
//! between partitions and never leaves a date half-alerted.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::AlertSink;
use crate::error::{EngineError, EngineResult};
use crate::store::LedgerStore;
use tally_core::consistency::check_daily;
use tally_core::{ConsistencyReport, DailyFigures, Money};

/// Runs daily consistency checks and publishes mismatches.
pub struct ConsistencyValidator {
    store: Arc<dyn LedgerStore>,
    alerts: AlertSink,
    epsilon: Money,
}

impl ConsistencyValidator {
    pub fn new(store: Arc<dyn LedgerStore>, alerts: AlertSink, epsilon: Money) -> Self {
        ConsistencyValidator {
            store,
            alerts,
            epsilon,
        }
    }

    /// Checks one business date and publishes an alert per mismatch.
    pub async fn validate_daily(&self, business_date: NaiveDate) -> EngineResult<ConsistencyReport> {
        let figures = self.gather(business_date).await?;
        let report = check_daily(figures, self.epsilon);

        let mut published = 0;
        for mismatch in &report.mismatches {
            if self.alerts.publish(mismatch.to_alert(business_date)).await? {
                published += 1;
            }
        }

        if report.consistent {
            debug!(business_date = %business_date, "Daily figures consistent");
        } else {
            warn!(
                business_date = %business_date,
                mismatches = report.mismatches.len(),
                new_alerts = published,
                "Daily figures inconsistent"
            );
        }
        Ok(report)
    }

    /// On-demand check before a financial report is produced.
    pub async fn get_daily_consistency_report(
        &self,
        business_date: NaiveDate,
    ) -> EngineResult<ConsistencyReport> {
        self.validate_daily(business_date).await
    }

    /// Validates every date in `from..=to`, oldest first.
    ///
    /// A cancelled scan returns the partitions it completed, or `Cancelled`
    /// when it completed none.
    pub async fn validate_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ConsistencyReport>> {
        if from > to {
            return Err(tally_core::ValidationError::InvalidFormat {
                field: "date range".to_string(),
                reason: format!("{from} is after {to}"),
            }
            .into());
        }

        let mut reports = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            if cancel.is_cancelled() {
                info!(
                    completed = reports.len(),
                    next = %date,
                    "Consistency scan cancelled"
                );
                if reports.is_empty() {
                    return Err(EngineError::Cancelled);
                }
                break;
            }
            reports.push(self.validate_daily(date).await?);
        }
        Ok(reports)
    }

    async fn gather(&self, business_date: NaiveDate) -> EngineResult<DailyFigures> {
        let method_totals = self.store.query_sales_aggregate(business_date).await?;
        let raw_sales_total = self.store.raw_sales_total(business_date).await?;
        let ledger_cash_from_sales = self.store.ledger_cash_from_sales(business_date).await?;

        Ok(DailyFigures {
            business_date,
            method_totals,
            raw_sales_total,
            ledger_cash_from_sales,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_core::{AlertType, MovementType, NewMovement, PaymentMethod, SalePayment, SaleRecord};
    use tally_db::{Database, DbConfig};

    async fn setup() -> (Arc<Database>, ConsistencyValidator) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let store: Arc<dyn LedgerStore> = db.clone();
        let validator =
            ConsistencyValidator::new(store.clone(), AlertSink::new(store), Money::from_minor(1));
        (db, validator)
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    async fn record_sale(db: &Database, id: &str, total: i64, payments: &[(PaymentMethod, i64)]) {
        db.sales()
            .record_sale(&SaleRecord {
                id: id.to_string(),
                business_date: today(),
                total_minor: total,
                payments: payments
                    .iter()
                    .map(|&(method, amount_minor)| SalePayment {
                        method,
                        amount_minor,
                    })
                    .collect(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn ledger_cash_sale(db: &Database, id: &str, amount: i64) {
        db.movements()
            .append(
                "s-1",
                &NewMovement {
                    id: id.to_string(),
                    movement_type: MovementType::SaleCash,
                    amount: Money::from_minor(amount),
                    category: "SALE_CASH".to_string(),
                    description: String::new(),
                    reference: None,
                    created_by: "cashier-1".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consistent_day() {
        let (db, validator) = setup().await;
        db.sessions()
            .open("s-1", "drawer-1", "cashier-1", Money::zero())
            .await
            .unwrap();
        record_sale(&db, "sale-1", 5_000, &[(PaymentMethod::Cash, 5_000)]).await;
        ledger_cash_sale(&db, "m-1", 5_000).await;

        let report = validator.validate_daily(today()).await.unwrap();
        assert!(report.consistent);
        assert!(report.mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_mismatches_alert_once() {
        let (db, validator) = setup().await;
        db.sessions()
            .open("s-1", "drawer-1", "cashier-1", Money::zero())
            .await
            .unwrap();
        // Tender lines short of the sale total, and a cash sale never rung
        // through the drawer.
        record_sale(
            &db,
            "sale-1",
            8_000,
            &[(PaymentMethod::Cash, 5_000), (PaymentMethod::Card, 2_000)],
        )
        .await;
        ledger_cash_sale(&db, "m-1", 4_000).await;

        let report = validator.validate_daily(today()).await.unwrap();
        assert!(!report.consistent);
        let kinds: Vec<AlertType> = report.mismatches.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&AlertType::PaymentMethodsMismatch));
        assert!(kinds.contains(&AlertType::CashDiscrepancy));

        // Unchanged data: same fingerprints, nothing new stored
        validator.validate_daily(today()).await.unwrap();
        assert_eq!(db.alerts().list_for_date(today()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_range_scan_and_cancellation() {
        let (_db, validator) = setup().await;
        let from = today().pred_opt().unwrap().pred_opt().unwrap();

        let token = CancellationToken::new();
        let reports = validator
            .validate_range(from, today(), &token)
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.consistent));

        token.cancel();
        let err = validator
            .validate_range(from, today(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));

        assert!(validator
            .validate_range(today(), from, &CancellationToken::new())
            .await
            .is_err());
    }
}
