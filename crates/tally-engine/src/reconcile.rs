//! # Reconciliation Engine
//!
//! Compares counted cash to what the ledger predicts and closes the session.
//!
//! ## Close Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reconcile(session, counted, op)                                        │
//! │                                                                         │
//! │  1. begin_close        OPEN → CLOSING, counted + op recorded (committed) │
//! │  2. finalize_close     ONE store transaction:                           │
//! │        expected = Σ cash movements                                      │
//! │        classify (EXACT | SURPLUS | SHORTFALL)                           │
//! │        0 < d < limit ──► AUTO_CORRECTION movement + LOW alert           │
//! │        |d| ≥ limit   ──► CRITICAL alert, requires audit                 │
//! │        otherwise     ──► MEDIUM alert when outside ε                    │
//! │        CLOSING → CLOSED                                                 │
//! │  3. announce alerts on the stream                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failure between 1 and 2 leaves the session CLOSING; replaying with the
//! same operation id resumes at 2. Replaying a finished close returns the
//! stored result.

use std::sync::Arc;

use tracing::{info, warn};

use crate::alerts::AlertSink;
use crate::error::{EngineError, EngineResult};
use crate::store::LedgerStore;
use tally_core::reconciliation::compute_expected;
use tally_core::{Money, ReconciliationPolicy, ReconciliationResult};

/// Computes expected cash and runs the close.
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    alerts: AlertSink,
    policy: ReconciliationPolicy,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, alerts: AlertSink, policy: ReconciliationPolicy) -> Self {
        ReconciliationEngine {
            store,
            alerts,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// Expected cash for a session from its movements alone.
    ///
    /// Uses the same summation the close transaction uses, so the figure a
    /// cashier sees mid-shift matches what the close will compare against.
    pub async fn compute_expected(&self, session_id: &str) -> EngineResult<Money> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("Drawer session {session_id}")));
        }

        let movements = self.store.list_movements(session_id).await?;
        compute_expected(&movements).ok_or_else(|| {
            EngineError::Internal(format!("Ledger overflow while summing session {session_id}"))
        })
    }

    /// Closes a session against a physical count.
    ///
    /// A discrepancy is never an error. It comes back in the result and as
    /// alerts.
    pub async fn reconcile(
        &self,
        session_id: &str,
        counted: Money,
        operation_id: &str,
    ) -> EngineResult<ReconciliationResult> {
        self.store
            .begin_close(session_id, operation_id, counted)
            .await?;
        let result = self
            .store
            .finalize_close(session_id, operation_id, &self.policy)
            .await?;

        if result.requires_audit {
            warn!(
                session_id = %session_id,
                operation_id = %operation_id,
                expected = %result.expected,
                counted = %result.counted,
                discrepancy = %result.discrepancy,
                "Reconciliation flagged for mandatory audit"
            );
        } else {
            info!(
                session_id = %session_id,
                classification = %result.classification,
                original_discrepancy = %result.original_discrepancy,
                auto_corrected = result.auto_correction.is_some(),
                "Reconciliation complete"
            );
        }

        // Alerts were persisted inside the close transaction.
        for alert in &result.alerts {
            self.alerts.announce(alert.clone());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertFilter;
    use tally_core::{AlertSeverity, AlertType, Classification, MovementType, NewMovement};
    use tally_db::{Database, DbConfig};

    async fn engine() -> (Arc<Database>, ReconciliationEngine) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let store: Arc<dyn LedgerStore> = db.clone();
        let sink = AlertSink::new(store.clone());
        (
            db,
            ReconciliationEngine::new(store, sink, ReconciliationPolicy::default()),
        )
    }

    fn movement(id: &str, movement_type: MovementType, amount: i64) -> NewMovement {
        NewMovement {
            id: id.to_string(),
            movement_type,
            amount: Money::from_minor(amount),
            category: movement_type.as_str().to_string(),
            description: String::new(),
            reference: None,
            created_by: "cashier-1".to_string(),
        }
    }

    async fn seed(db: &Database) {
        db.sessions()
            .open("s-1", "drawer-1", "cashier-1", Money::from_minor(10_000))
            .await
            .unwrap();
        let movements = db.movements();
        movements
            .append("s-1", &movement("m-1", MovementType::SaleCash, 5_000))
            .await
            .unwrap();
        movements
            .append("s-1", &movement("m-2", MovementType::ManualExpense, 500))
            .await
            .unwrap();
        movements
            .append("s-1", &movement("m-3", MovementType::SaleCard, 7_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_compute_expected_ignores_non_cash() {
        let (db, engine) = engine().await;
        seed(&db).await;
        assert_eq!(engine.compute_expected("s-1").await.unwrap().minor(), 14_500);
    }

    #[tokio::test]
    async fn test_compute_expected_unknown_session() {
        let (_db, engine) = engine().await;
        let err = engine.compute_expected("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reconcile_announces_critical_alert() {
        let (db, engine) = engine().await;
        seed(&db).await;
        let mut critical = engine
            .alerts
            .subscribe(AlertFilter::min_severity(AlertSeverity::Critical));

        let result = engine
            .reconcile("s-1", Money::from_minor(12_000), "op-1")
            .await
            .unwrap();
        assert_eq!(result.classification, Classification::Shortfall);
        assert_eq!(result.discrepancy.minor(), -2_500);
        assert!(result.requires_audit);

        let alert = critical.recv().await.unwrap();
        assert_eq!(alert.alert_type, AlertType::ReconciliationDiscrepancy);
        assert!(alert.requires_action);
        assert_eq!(alert.session_id.as_deref(), Some("s-1"));
    }
}
