//! End-to-end drawer scenarios against an in-memory Ledger Store, with a
//! fault-injecting store wrapper for the resilience paths.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use tally_core::{
    AlertSeverity, AlertType, AuditAnnotation, Classification, DrawerSession, FinancialAlert,
    MethodTotal, Money, Movement, MovementType, NewMovement, PaymentMethod, ReconciliationPolicy,
    ReconciliationResult, SalePayment, SaleRecord, SessionState,
};
use tally_core::money::MAX_AMOUNT_MINOR;
use tally_db::{Database, DbConfig};
use tally_engine::{
    AlertFilter, BreakerState, EngineError, EngineResult, Ledger, LedgerConfig, LedgerStore,
};

// =============================================================================
// Fault-injecting store
// =============================================================================

/// Delegates to a real store, failing or stalling calls on demand.
struct FlakyStore {
    inner: Database,
    calls: AtomicU32,
    outage: AtomicBool,
    delay_ms: AtomicU64,
    /// (operation name or "*", failures left)
    plan: Mutex<Option<(&'static str, u32)>>,
}

impl FlakyStore {
    fn new(inner: Database) -> Self {
        FlakyStore {
            inner,
            calls: AtomicU32::new(0),
            outage: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            plan: Mutex::new(None),
        }
    }

    fn fail_next(&self, op: &'static str, times: u32) {
        *self.plan.lock().unwrap() = Some((op, times));
    }

    fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self, op: &'static str) -> EngineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.outage.load(Ordering::SeqCst) {
            return Err(EngineError::TransientIo(format!("injected outage in {op}")));
        }

        let planned_failure = {
            let mut plan = self.plan.lock().unwrap();
            match plan.as_mut() {
                Some((target, left)) if (*target == op || *target == "*") && *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if planned_failure {
            return Err(EngineError::TransientIo(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn open_session(
        &self,
        session_id: &str,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> EngineResult<DrawerSession> {
        self.gate("open_session").await?;
        self.inner
            .open_session(session_id, drawer_id, cashier_id, opening)
            .await
    }

    async fn get_session(&self, session_id: &str) -> EngineResult<Option<DrawerSession>> {
        self.gate("get_session").await?;
        self.inner.get_session(session_id).await
    }

    async fn find_live_session(&self, drawer_id: &str) -> EngineResult<Option<DrawerSession>> {
        self.gate("find_live_session").await?;
        self.inner.find_live_session(drawer_id).await
    }

    async fn find_session_by_close_operation(
        &self,
        operation_id: &str,
    ) -> EngineResult<Option<DrawerSession>> {
        self.gate("find_session_by_close_operation").await?;
        self.inner.find_session_by_close_operation(operation_id).await
    }

    async fn begin_close(
        &self,
        session_id: &str,
        operation_id: &str,
        counted: Money,
    ) -> EngineResult<DrawerSession> {
        self.gate("begin_close").await?;
        self.inner.begin_close(session_id, operation_id, counted).await
    }

    async fn finalize_close(
        &self,
        session_id: &str,
        operation_id: &str,
        policy: &ReconciliationPolicy,
    ) -> EngineResult<ReconciliationResult> {
        self.gate("finalize_close").await?;
        self.inner
            .finalize_close(session_id, operation_id, policy)
            .await
    }

    async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> EngineResult<AuditAnnotation> {
        self.gate("annotate").await?;
        self.inner.annotate(session_id, author, note).await
    }

    async fn annotations(&self, session_id: &str) -> EngineResult<Vec<AuditAnnotation>> {
        self.gate("annotations").await?;
        self.inner.annotations(session_id).await
    }

    async fn append_movement(
        &self,
        session_id: &str,
        movement: &NewMovement,
    ) -> EngineResult<Movement> {
        self.gate("append_movement").await?;
        self.inner.append_movement(session_id, movement).await
    }

    async fn list_movements(&self, session_id: &str) -> EngineResult<Vec<Movement>> {
        self.gate("list_movements").await?;
        self.inner.list_movements(session_id).await
    }

    async fn query_sales_aggregate(
        &self,
        business_date: NaiveDate,
    ) -> EngineResult<Vec<MethodTotal>> {
        self.gate("query_sales_aggregate").await?;
        self.inner.query_sales_aggregate(business_date).await
    }

    async fn raw_sales_total(&self, business_date: NaiveDate) -> EngineResult<Money> {
        self.gate("raw_sales_total").await?;
        self.inner.raw_sales_total(business_date).await
    }

    async fn ledger_cash_from_sales(&self, business_date: NaiveDate) -> EngineResult<Money> {
        self.gate("ledger_cash_from_sales").await?;
        self.inner.ledger_cash_from_sales(business_date).await
    }

    async fn append_alert(&self, alert: &FinancialAlert) -> EngineResult<bool> {
        self.gate("append_alert").await?;
        self.inner.append_alert(alert).await
    }

    async fn list_alerts(&self, business_date: NaiveDate) -> EngineResult<Vec<FinancialAlert>> {
        self.gate("list_alerts").await?;
        self.inner.list_alerts(business_date).await
    }

    async fn session_alerts(&self, session_id: &str) -> EngineResult<Vec<FinancialAlert>> {
        self.gate("session_alerts").await?;
        self.inner.session_alerts(session_id).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> LedgerConfig {
    let mut config = LedgerConfig::default();
    config.resilience.retry_base_delay_ms = 1;
    config.resilience.retry_max_delay_ms = 5;
    config.resilience.circuit_breaker_reset_ms = 200;
    config
}

async fn ledger_with(config: &LedgerConfig) -> (Ledger, Arc<FlakyStore>, Database) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let flaky = Arc::new(FlakyStore::new(db.clone()));
    let ledger = Ledger::new(flaky.clone(), config);
    (ledger, flaky, db)
}

async fn ledger() -> (Ledger, Arc<FlakyStore>, Database) {
    ledger_with(&test_config()).await
}

/// Opening 100.00, cash sale 50.00, expense 5.00: expected 145.00.
async fn standard_shift(ledger: &Ledger, drawer: &str) -> DrawerSession {
    let session = ledger
        .drawers
        .open(drawer, "cashier-1", Money::from_minor(10_000))
        .await
        .unwrap();
    ledger
        .drawers
        .record_cash_movement(drawer, MovementType::SaleCash, Money::from_minor(5_000), "sale")
        .await
        .unwrap();
    ledger
        .drawers
        .record_cash_movement(
            drawer,
            MovementType::ManualExpense,
            Money::from_minor(500),
            "cleaning supplies",
        )
        .await
        .unwrap();
    session
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

// =============================================================================
// Reconciliation scenarios
// =============================================================================

#[tokio::test]
async fn scenario_exact_count_closes_without_alerts() {
    let (ledger, _, db) = ledger().await;
    let session = standard_shift(&ledger, "drawer-1").await;

    assert_eq!(
        ledger.reconciler.compute_expected(&session.id).await.unwrap(),
        Money::from_minor(14_500)
    );

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(14_500))
        .await
        .unwrap();

    assert_eq!(result.expected.minor(), 14_500);
    assert_eq!(result.counted.minor(), 14_500);
    assert!(result.discrepancy.is_zero());
    assert_eq!(result.classification, Classification::Exact);
    assert!(result.auto_correction.is_none());
    assert!(result.alerts.is_empty());
    assert!(db.alerts().list_for_session(&session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_small_surplus_is_auto_corrected() {
    let (ledger, _, _db) = ledger().await;
    let session = standard_shift(&ledger, "drawer-1").await;

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(14_550))
        .await
        .unwrap();

    assert_eq!(result.original_discrepancy.minor(), 50);
    assert_eq!(result.classification, Classification::Surplus);
    assert_eq!(result.auto_correction, Some(Money::from_minor(50)));
    assert!(result.discrepancy.is_zero());
    assert_eq!(result.expected.minor(), 14_550);
    assert!(!result.requires_audit);

    assert_eq!(result.alerts.len(), 1);
    assert_eq!(result.alerts[0].alert_type, AlertType::AutoCorrectionApplied);
    assert_eq!(result.alerts[0].severity, AlertSeverity::Low);

    let corrections: Vec<Movement> = ledger
        .drawers
        .movements(&session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.movement_type == MovementType::AutoCorrection)
        .collect();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].amount_minor, 50);

    let closed = ledger.drawers.state(&session.id).await.unwrap();
    assert_eq!(closed.original_discrepancy_minor, Some(50));
    assert_eq!(closed.discrepancy_minor, Some(0));
}

#[tokio::test]
async fn scenario_large_shortfall_is_flagged_but_closes() {
    let (ledger, _, _db) = ledger().await;
    let mut critical = ledger
        .alerts
        .subscribe(AlertFilter::min_severity(AlertSeverity::Critical));
    let session = standard_shift(&ledger, "drawer-1").await;

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(12_000))
        .await
        .unwrap();

    assert_eq!(result.discrepancy.minor(), -2_500);
    assert_eq!(result.classification, Classification::Shortfall);
    assert!(result.auto_correction.is_none());
    assert!(result.requires_audit);

    let alert = critical.recv().await.unwrap();
    assert_eq!(alert.alert_type, AlertType::ReconciliationDiscrepancy);
    assert!(alert.requires_action);
    assert_eq!(alert.payload["expected_minor"], 14_500);
    assert_eq!(alert.payload["counted_minor"], 12_000);
    assert_eq!(alert.payload["discrepancy_minor"], -2_500);

    let closed = ledger.drawers.state(&session.id).await.unwrap();
    assert_eq!(closed.state, SessionState::Closed);
    assert_eq!(closed.discrepancy_minor, Some(-2_500));
}

#[tokio::test]
async fn small_shortfall_is_not_corrected_but_alerted() {
    let (ledger, _, _db) = ledger().await;
    standard_shift(&ledger, "drawer-1").await;

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(14_470))
        .await
        .unwrap();

    assert_eq!(result.classification, Classification::Shortfall);
    assert!(result.auto_correction.is_none());
    assert_eq!(result.discrepancy.minor(), -30);
    assert!(!result.requires_audit);
    assert_eq!(result.alerts.len(), 1);
    assert_eq!(result.alerts[0].severity, AlertSeverity::Medium);
}

// =============================================================================
// Boundaries
// =============================================================================

#[tokio::test]
async fn epsilon_boundary_is_exclusive() {
    let mut config = test_config();
    config.reconciliation.tolerance_epsilon = 5;
    let (ledger, _, _db) = ledger_with(&config).await;

    ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::from_minor(1_000))
        .await
        .unwrap();
    let at_epsilon = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(1_005))
        .await
        .unwrap();
    assert_eq!(at_epsilon.classification, Classification::Surplus);

    ledger
        .drawers
        .open("drawer-2", "cashier-1", Money::from_minor(1_000))
        .await
        .unwrap();
    let below_epsilon = ledger
        .drawers
        .close_drawer("drawer-2", Money::from_minor(1_004))
        .await
        .unwrap();
    assert_eq!(below_epsilon.classification, Classification::Exact);
    assert!(below_epsilon.auto_correction.is_none());
}

#[tokio::test]
async fn auto_correct_limit_boundary_is_exclusive() {
    let (ledger, _, _db) = ledger().await;

    ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::from_minor(1_000))
        .await
        .unwrap();
    let below_limit = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(1_099))
        .await
        .unwrap();
    assert_eq!(below_limit.auto_correction, Some(Money::from_minor(99)));

    ledger
        .drawers
        .open("drawer-2", "cashier-1", Money::from_minor(1_000))
        .await
        .unwrap();
    let at_limit = ledger
        .drawers
        .close_drawer("drawer-2", Money::from_minor(1_100))
        .await
        .unwrap();
    assert!(at_limit.auto_correction.is_none());
    assert!(at_limit.requires_audit);
    assert_eq!(at_limit.alerts[0].severity, AlertSeverity::Critical);
}

#[tokio::test]
async fn oversized_cash_never_leaves_a_drawer_stuck_closing() {
    let (ledger, _, _db) = ledger().await;
    let session = ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::zero())
        .await
        .unwrap();

    let err = ledger
        .drawers
        .append(&session.id, movement("huge", MovementType::SaleCash, i64::MAX / 2 + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    ledger
        .drawers
        .append(&session.id, movement("big", MovementType::SaleCash, MAX_AMOUNT_MINOR))
        .await
        .unwrap();
    let err = ledger
        .drawers
        .append(&session.id, movement("one-more", MovementType::SaleCash, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(MAX_AMOUNT_MINOR))
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::Exact);
    assert_eq!(
        ledger.drawers.state(&session.id).await.unwrap().state,
        SessionState::Closed
    );
}

#[tokio::test]
async fn out_of_range_count_is_rejected_and_drawer_stays_open() {
    let (ledger, _, _db) = ledger().await;
    let session = ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::zero())
        .await
        .unwrap();
    ledger
        .drawers
        .record_cash_movement("drawer-1", MovementType::Withdrawal, Money::from_minor(1), "")
        .await
        .unwrap();

    let err = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(
        ledger.drawers.state(&session.id).await.unwrap().state,
        SessionState::Open
    );

    let result = ledger
        .drawers
        .close_drawer("drawer-1", Money::zero())
        .await
        .unwrap();
    assert_eq!(result.original_discrepancy.minor(), 1);
    assert_eq!(result.discrepancy_bps, Some(10_000));
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn expected_cash_is_order_independent() {
    let (ledger, _, _db) = ledger().await;
    let entries = [
        ("sale", MovementType::SaleCash, 2_500),
        ("card", MovementType::SaleCard, 9_999),
        ("out", MovementType::Withdrawal, 1_000),
        ("in", MovementType::ManualIncome, 300),
        ("exp", MovementType::ManualExpense, 120),
    ];

    let first = ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::from_minor(5_000))
        .await
        .unwrap();
    for (id, kind, amount) in entries {
        ledger
            .drawers
            .append(&first.id, movement(&format!("a-{id}"), kind, amount))
            .await
            .unwrap();
    }

    let second = ledger
        .drawers
        .open("drawer-2", "cashier-1", Money::from_minor(5_000))
        .await
        .unwrap();
    for (id, kind, amount) in entries.into_iter().rev() {
        ledger
            .drawers
            .append(&second.id, movement(&format!("b-{id}"), kind, amount))
            .await
            .unwrap();
    }

    let a = ledger.reconciler.compute_expected(&first.id).await.unwrap();
    let b = ledger.reconciler.compute_expected(&second.id).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.minor(), 5_000 + 2_500 - 1_000 + 300 - 120);
}

#[tokio::test]
async fn duplicate_movement_id_records_once() {
    let (ledger, _, _db) = ledger().await;
    let session = ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::zero())
        .await
        .unwrap();

    let first = ledger
        .drawers
        .append(&session.id, movement("m-1", MovementType::SaleCash, 700))
        .await
        .unwrap();
    let second = ledger
        .drawers
        .append(&session.id, movement("m-1", MovementType::SaleCash, 700))
        .await
        .unwrap();

    assert_eq!(first, second);
    let movements = ledger.drawers.movements(&session.id).await.unwrap();
    assert_eq!(movements.iter().filter(|m| m.id == "m-1").count(), 1);
}

#[tokio::test]
async fn close_replay_returns_same_result_without_second_correction() {
    let (ledger, _, _db) = ledger().await;
    let session = standard_shift(&ledger, "drawer-1").await;

    let first = ledger
        .drawers
        .close_drawer_with_operation("drawer-1", Money::from_minor(14_550), "close-1")
        .await
        .unwrap();
    let replay = ledger
        .drawers
        .close_drawer_with_operation("drawer-1", Money::from_minor(14_550), "close-1")
        .await
        .unwrap();

    assert_eq!(first.expected, replay.expected);
    assert_eq!(first.discrepancy, replay.discrepancy);
    assert_eq!(first.original_discrepancy, replay.original_discrepancy);
    assert_eq!(first.auto_correction, replay.auto_correction);
    assert_eq!(first.classification, replay.classification);

    let corrections = ledger
        .drawers
        .movements(&session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.movement_type == MovementType::AutoCorrection)
        .count();
    assert_eq!(corrections, 1);
}

// =============================================================================
// Resilience
// =============================================================================

#[tokio::test]
async fn idempotent_append_survives_transient_failures() {
    let (ledger, flaky, _db) = ledger().await;
    let session = ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::zero())
        .await
        .unwrap();

    flaky.fail_next("append_movement", 2);
    let recorded = ledger
        .drawers
        .append(&session.id, movement("m-1", MovementType::SaleCash, 400))
        .await
        .unwrap();
    assert_eq!(recorded.amount_minor, 400);

    let snapshot = ledger.telemetry().await;
    assert!(snapshot.failures >= 2);
}

#[tokio::test]
async fn transient_close_failure_asks_for_replay_with_operation_id() {
    let (ledger, flaky, _db) = ledger().await;
    let session = standard_shift(&ledger, "drawer-1").await;

    flaky.fail_next("finalize_close", 1);
    let err = ledger
        .drawers
        .close_drawer("drawer-1", Money::from_minor(14_500))
        .await
        .unwrap_err();

    let operation_id = match err {
        EngineError::RetryWithOperationId { operation_id, .. } => operation_id,
        other => panic!("expected RetryWithOperationId, got {other:?}"),
    };
    let stuck = ledger.drawers.state(&session.id).await.unwrap();
    assert_eq!(stuck.state, SessionState::Closing);

    let result = ledger
        .drawers
        .close_drawer_with_operation("drawer-1", Money::from_minor(14_500), &operation_id)
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::Exact);
    assert_eq!(
        ledger.drawers.state(&session.id).await.unwrap().state,
        SessionState::Closed
    );
}

#[tokio::test]
async fn breaker_fails_fast_then_admits_one_probe() {
    let mut config = test_config();
    config.resilience.circuit_breaker_threshold = 3;
    config.resilience.retry_max_attempts = 1;
    let (ledger, flaky, _db) = ledger_with(&config).await;

    flaky.set_outage(true);
    for _ in 0..3 {
        let err = ledger.drawers.state("s-1").await.unwrap_err();
        assert!(err.is_retryable() || err.is_degraded());
    }
    assert_eq!(ledger.store().breaker().state(), BreakerState::Open);

    // Fail fast: the backend is not touched
    let before = flaky.calls();
    let err = ledger.drawers.state("s-1").await.unwrap_err();
    assert!(matches!(err, EngineError::ServiceDegraded { .. }));
    assert_eq!(flaky.calls(), before);

    // After the reset window one slow probe goes through; a concurrent
    // caller is still rejected.
    tokio::time::sleep(Duration::from_millis(250)).await;
    flaky.set_outage(false);
    flaky.set_delay(Duration::from_millis(100));

    let probe = {
        let ledger = Arc::new(ledger);
        let prober = ledger.clone();
        let handle = tokio::spawn(async move { prober.drawers.state("s-1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = ledger.drawers.state("s-1").await.unwrap_err();
        assert!(matches!(rejected, EngineError::ServiceDegraded { .. }));
        assert_eq!(ledger.store().breaker().state(), BreakerState::HalfOpen);

        let probe = handle.await.unwrap();
        assert_eq!(ledger.store().breaker().state(), BreakerState::Closed);
        probe
    };
    // The probe reached the store, which answered "no such session"
    assert!(matches!(probe, Err(EngineError::NotFound(_))));
    assert_eq!(flaky.calls(), before + 1);
}

#[tokio::test]
async fn abandoned_half_open_call_reopens_breaker_instead_of_wedging_it() {
    let mut config = test_config();
    config.resilience.circuit_breaker_threshold = 1;
    config.resilience.retry_max_attempts = 1;
    let (ledger, flaky, _db) = ledger_with(&config).await;

    flaky.set_outage(true);
    ledger.drawers.state("s-1").await.unwrap_err();
    assert_eq!(ledger.store().breaker().state(), BreakerState::Open);

    // The probe's caller gives up while the store is still working
    tokio::time::sleep(Duration::from_millis(250)).await;
    flaky.set_outage(false);
    flaky.set_delay(Duration::from_millis(500));
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), ledger.drawers.state("s-1")).await;
    assert!(abandoned.is_err());
    assert_eq!(ledger.store().breaker().state(), BreakerState::Open);

    let err = ledger.drawers.state("s-1").await.unwrap_err();
    assert!(matches!(err, EngineError::ServiceDegraded { .. }));

    // The next window admits a fresh probe that closes the breaker
    flaky.set_delay(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(250)).await;
    let probe = ledger.drawers.state("s-1").await;
    assert!(matches!(probe, Err(EngineError::NotFound(_))));
    assert_eq!(ledger.store().breaker().state(), BreakerState::Closed);
}

#[tokio::test]
async fn slow_store_call_times_out_as_transient() {
    let mut config = test_config();
    config.resilience.call_timeout_ms = 30;
    config.resilience.retry_max_attempts = 1;
    let (ledger, flaky, _db) = ledger_with(&config).await;

    flaky.set_delay(Duration::from_millis(200));
    let err = ledger.drawers.state("s-1").await.unwrap_err();
    assert!(matches!(err, EngineError::TransientIo(_)));
}

// =============================================================================
// Consistency
// =============================================================================

#[tokio::test]
async fn daily_report_compares_sales_feed_with_drawer_ledger() {
    let (ledger, _, db) = ledger().await;
    let today = Utc::now().date_naive();

    ledger
        .drawers
        .open("drawer-1", "cashier-1", Money::from_minor(10_000))
        .await
        .unwrap();
    ledger
        .drawers
        .record_cash_movement("drawer-1", MovementType::SaleCash, Money::from_minor(3_000), "")
        .await
        .unwrap();
    db.sales()
        .record_sale(&SaleRecord {
            id: "sale-1".to_string(),
            business_date: today,
            total_minor: 5_000,
            payments: vec![
                SalePayment {
                    method: PaymentMethod::Cash,
                    amount_minor: 3_000,
                },
                SalePayment {
                    method: PaymentMethod::Card,
                    amount_minor: 2_000,
                },
            ],
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let report = ledger
        .validator
        .get_daily_consistency_report(today)
        .await
        .unwrap();
    assert!(report.consistent, "unexpected mismatches: {:?}", report.mismatches);

    // A cash sale that never reached the drawer ledger
    db.sales()
        .record_sale(&SaleRecord {
            id: "sale-2".to_string(),
            business_date: today,
            total_minor: 1_000,
            payments: vec![SalePayment {
                method: PaymentMethod::Cash,
                amount_minor: 1_000,
            }],
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut high = ledger
        .alerts
        .subscribe(AlertFilter::min_severity(AlertSeverity::High).on_date(today));
    let report = ledger
        .validator
        .get_daily_consistency_report(today)
        .await
        .unwrap();
    assert!(!report.consistent);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].kind, AlertType::CashDiscrepancy);
    assert_eq!(report.mismatches[0].difference.minor(), 1_000);

    let alert = high.recv().await.unwrap();
    assert_eq!(alert.alert_type, AlertType::CashDiscrepancy);
    assert_eq!(ledger.alerts.alerts_for(today).await.unwrap().len(), 1);
}
