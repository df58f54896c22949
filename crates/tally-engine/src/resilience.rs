//! # Resilience Wrapper
//!
//! Circuit breaker, bounded retry and call telemetry around every Ledger
//! Store call.
//!
//! ## Circuit Breaker
//! ```text
//!            N consecutive transient failures
//!   CLOSED ─────────────────────────────────────► OPEN
//!     ▲                                            │
//!     │ probe succeeds          reset window       │
//!     │                         elapsed            ▼
//!     └─────────────────────────────────────── HALF_OPEN
//!                                   probe fails ──► OPEN (window restarts)
//! ```
//! While OPEN every call fails fast with `ServiceDegraded`. HALF_OPEN lets
//! exactly one probe through; concurrent callers keep failing fast until the
//! probe settles. A probe whose caller goes away before it settles counts as
//! a failed probe. Outcomes of calls admitted before the breaker tripped do
//! not move an OPEN or HALF_OPEN breaker.
//!
//! ## Retry
//! Only idempotent calls are retried: reads, `open_session` (caller-chosen
//! id), `append_movement` (movement id) and `append_alert` (fingerprint).
//! The two close phases and annotations run once; the drawer service turns
//! a transient close failure into `RetryWithOperationId`.
//!
//! Rejections from the store (validation, state, not found) are answers, not
//! failures: they reset the failure count and are never retried.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ResilienceSettings;
use crate::error::{EngineError, EngineResult};
use crate::store::LedgerStore;
use tally_core::{
    AuditAnnotation, DrawerSession, FinancialAlert, MethodTotal, Money, Movement, NewMovement,
    ReconciliationPolicy, ReconciliationResult,
};

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker on tokio time.
///
/// The lock is never held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_after: Duration,
    inner: StdMutex<BreakerInner>,
}

/// Admission for one call through the breaker.
///
/// Settle it with [`BreakerPermit::success`] or [`BreakerPermit::failure`].
/// A probe permit dropped unsettled (caller cancelled, timed out elsewhere)
/// counts as a failed probe and re-opens the breaker.
#[must_use = "an unsettled probe permit re-opens the breaker"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// True for the single HALF_OPEN probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            warn!("Probe abandoned before settling, circuit breaker re-opened");
            self.breaker.record_failure(true);
        }
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        CircuitBreaker {
            threshold: threshold.max(1),
            reset_after,
            inner: StdMutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Asks permission for one call.
    ///
    /// Returns the time left before a probe will be admitted when the call
    /// must fail fast.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Duration> {
        let mut inner = self.lock();
        let probe = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.reset_after);
                if elapsed < self.reset_after {
                    return Err(self.reset_after - elapsed);
                }
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = true;
                info!("Circuit breaker half-open, admitting probe");
                true
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.reset_after);
                }
                inner.probe_in_flight = true;
                true
            }
        };

        Ok(BreakerPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Only the probe closes a tripped breaker; late successes from calls
    /// admitted before the trip are ignored.
    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        match (inner.state, probe) {
            (BreakerState::HalfOpen, true) => {
                info!("Circuit breaker closed");
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            (BreakerState::Closed, _) => inner.consecutive_failures = 0,
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        match (inner.state, probe) {
            (BreakerState::HalfOpen, true) => {
                warn!("Probe failed, circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            (BreakerState::Closed, _) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        reset_ms = self.reset_after.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Telemetry
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Sample {
    duration: Duration,
    ok: bool,
}

/// Bounded per-instance ring buffer of store call outcomes.
#[derive(Debug)]
pub struct Telemetry {
    window: usize,
    sla_latency: Duration,
    sla_target_bps: u32,
    samples: Mutex<VecDeque<Sample>>,
}

/// Point-in-time view of the telemetry window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub calls: usize,
    pub failures: usize,
    pub mean_latency_ms: u64,
    pub p95_latency_ms: u64,
    /// Share of calls that succeeded within the SLA latency, in basis points.
    pub sla_compliance_bps: u32,
    pub sla_target_bps: u32,
}

impl TelemetrySnapshot {
    /// True when the window is non-empty and compliance is under target.
    pub fn needs_escalation(&self) -> bool {
        self.calls > 0 && self.sla_compliance_bps < self.sla_target_bps
    }
}

impl Telemetry {
    pub fn new(window: usize, sla_latency: Duration, sla_target_bps: u32) -> Self {
        Telemetry {
            window: window.max(1),
            sla_latency,
            sla_target_bps,
            samples: Mutex::new(VecDeque::with_capacity(window.max(1))),
        }
    }

    pub async fn record(&self, duration: Duration, ok: bool) {
        let mut samples = self.samples.lock().await;
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(Sample { duration, ok });
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        let samples = self.samples.lock().await;
        let calls = samples.len();
        if calls == 0 {
            return TelemetrySnapshot {
                calls: 0,
                failures: 0,
                mean_latency_ms: 0,
                p95_latency_ms: 0,
                sla_compliance_bps: 10_000,
                sla_target_bps: self.sla_target_bps,
            };
        }

        let failures = samples.iter().filter(|s| !s.ok).count();
        let within_sla = samples
            .iter()
            .filter(|s| s.ok && s.duration <= self.sla_latency)
            .count();

        let mut millis: Vec<u64> = samples
            .iter()
            .map(|s| s.duration.as_millis() as u64)
            .collect();
        millis.sort_unstable();
        let total: u64 = millis.iter().sum();
        // Nearest-rank percentile
        let p95_rank = (calls * 95).div_ceil(100).max(1);

        TelemetrySnapshot {
            calls,
            failures,
            mean_latency_ms: total / calls as u64,
            p95_latency_ms: millis[p95_rank - 1],
            sla_compliance_bps: (within_sla * 10_000 / calls) as u32,
            sla_target_bps: self.sla_target_bps,
        }
    }
}

// =============================================================================
// Resilient Store
// =============================================================================

/// [`LedgerStore`] decorator applying breaker, timeout, retry and telemetry.
pub struct ResilientStore {
    inner: Arc<dyn LedgerStore>,
    breaker: CircuitBreaker,
    telemetry: Telemetry,
    settings: ResilienceSettings,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn LedgerStore>, settings: &ResilienceSettings) -> Self {
        ResilientStore {
            inner,
            breaker: CircuitBreaker::new(settings.circuit_breaker_threshold, settings.reset_after()),
            telemetry: Telemetry::new(
                settings.telemetry_window,
                settings.sla_latency(),
                settings.sla_target_bps,
            ),
            settings: settings.clone(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot().await
    }

    /// One guarded attempt: breaker gate, timeout, bookkeeping.
    async fn attempt<T, Fut>(&self, op: &'static str, call: Fut) -> EngineResult<T>
    where
        Fut: Future<Output = EngineResult<T>>,
    {
        let permit = self
            .breaker
            .try_acquire()
            .map_err(|retry_after| EngineError::ServiceDegraded { retry_after })?;

        let started = Instant::now();
        let timeout = self.settings.call_timeout();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::TransientIo(format!(
                "{op} timed out after {}ms",
                timeout.as_millis()
            ))),
        };
        let elapsed = started.elapsed();

        let failed = matches!(result, Err(ref e) if e.is_retryable());
        self.telemetry.record(elapsed, !failed).await;
        if failed {
            permit.failure();
        } else {
            permit.success();
        }

        debug!(op, elapsed_ms = elapsed.as_millis() as u64, failed, "Ledger store call");
        result
    }

    /// Retries transient failures with exponential backoff.
    async fn idempotent<T, F, Fut>(&self, op: &'static str, mut call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let max_attempts = self.settings.retry_max_attempts.max(1);
        let mut backoff = ExponentialBackoff {
            initial_interval: self.settings.base_delay(),
            max_interval: self.settings.max_delay(),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 1;
        loop {
            match self.attempt(op, call()).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or_else(|| self.settings.max_delay());
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Ledger store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => return Err(self.exhausted(err).await),
                other => return other,
            }
        }
    }

    /// A single attempt for calls that must not be replayed blindly.
    async fn once<T, Fut>(&self, op: &'static str, call: Fut) -> EngineResult<T>
    where
        Fut: Future<Output = EngineResult<T>>,
    {
        self.attempt(op, call).await
    }

    /// Exhausted retries surface as degraded once the breaker has tripped.
    async fn exhausted(&self, err: EngineError) -> EngineError {
        if self.breaker.state() == BreakerState::Open {
            EngineError::ServiceDegraded {
                retry_after: self.settings.reset_after(),
            }
        } else {
            err
        }
    }
}

#[async_trait]
impl LedgerStore for ResilientStore {
    async fn open_session(
        &self,
        session_id: &str,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> EngineResult<DrawerSession> {
        self.idempotent("open_session", || {
            self.inner
                .open_session(session_id, drawer_id, cashier_id, opening)
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> EngineResult<Option<DrawerSession>> {
        self.idempotent("get_session", || self.inner.get_session(session_id))
            .await
    }

    async fn find_live_session(&self, drawer_id: &str) -> EngineResult<Option<DrawerSession>> {
        self.idempotent("find_live_session", || self.inner.find_live_session(drawer_id))
            .await
    }

    async fn find_session_by_close_operation(
        &self,
        operation_id: &str,
    ) -> EngineResult<Option<DrawerSession>> {
        self.idempotent("find_session_by_close_operation", || {
            self.inner.find_session_by_close_operation(operation_id)
        })
        .await
    }

    async fn begin_close(
        &self,
        session_id: &str,
        operation_id: &str,
        counted: Money,
    ) -> EngineResult<DrawerSession> {
        self.once(
            "begin_close",
            self.inner.begin_close(session_id, operation_id, counted),
        )
        .await
    }

    async fn finalize_close(
        &self,
        session_id: &str,
        operation_id: &str,
        policy: &ReconciliationPolicy,
    ) -> EngineResult<ReconciliationResult> {
        self.once(
            "finalize_close",
            self.inner.finalize_close(session_id, operation_id, policy),
        )
        .await
    }

    async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> EngineResult<AuditAnnotation> {
        self.once("annotate", self.inner.annotate(session_id, author, note))
            .await
    }

    async fn annotations(&self, session_id: &str) -> EngineResult<Vec<AuditAnnotation>> {
        self.idempotent("annotations", || self.inner.annotations(session_id))
            .await
    }

    async fn append_movement(
        &self,
        session_id: &str,
        movement: &NewMovement,
    ) -> EngineResult<Movement> {
        self.idempotent("append_movement", || {
            self.inner.append_movement(session_id, movement)
        })
        .await
    }

    async fn list_movements(&self, session_id: &str) -> EngineResult<Vec<Movement>> {
        self.idempotent("list_movements", || self.inner.list_movements(session_id))
            .await
    }

    async fn query_sales_aggregate(
        &self,
        business_date: NaiveDate,
    ) -> EngineResult<Vec<MethodTotal>> {
        self.idempotent("query_sales_aggregate", || {
            self.inner.query_sales_aggregate(business_date)
        })
        .await
    }

    async fn raw_sales_total(&self, business_date: NaiveDate) -> EngineResult<Money> {
        self.idempotent("raw_sales_total", || self.inner.raw_sales_total(business_date))
            .await
    }

    async fn ledger_cash_from_sales(&self, business_date: NaiveDate) -> EngineResult<Money> {
        self.idempotent("ledger_cash_from_sales", || {
            self.inner.ledger_cash_from_sales(business_date)
        })
        .await
    }

    async fn append_alert(&self, alert: &FinancialAlert) -> EngineResult<bool> {
        self.idempotent("append_alert", || self.inner.append_alert(alert))
            .await
    }

    async fn list_alerts(&self, business_date: NaiveDate) -> EngineResult<Vec<FinancialAlert>> {
        self.idempotent("list_alerts", || self.inner.list_alerts(business_date))
            .await
    }

    async fn session_alerts(&self, session_id: &str) -> EngineResult<Vec<FinancialAlert>> {
        self.idempotent("session_alerts", || self.inner.session_alerts(session_id))
            .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Trips the breaker with `n` admitted failing calls.
    fn trip(breaker: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            breaker.try_acquire().unwrap().failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(30_000));

        trip(&breaker, 2);
        assert_eq!(breaker.state(), BreakerState::Closed);

        trip(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        let retry_after = breaker.try_acquire().unwrap_err();
        assert_eq!(retry_after, Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1_000));
        trip(&breaker, 1);
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Second caller while the probe is in flight
        assert!(breaker.try_acquire().is_err());

        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(!breaker.try_acquire().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1_000));
        trip(&breaker, 1);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_half_open_permit_reopens_and_next_window_admits_again() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1_000));
        trip(&breaker, 1);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let probe = breaker.try_acquire().unwrap();
        drop(probe);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(3_600)).await;
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1_000));
        let slow_call = breaker.try_acquire().unwrap();
        trip(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        slow_call.success();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcome_does_not_settle_half_open_call() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1_000));
        let slow_call = breaker.try_acquire().unwrap();
        trip(&breaker, 1);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let probe = breaker.try_acquire().unwrap();
        slow_call.failure();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        trip(&breaker, 1);
        breaker.try_acquire().unwrap().success();
        trip(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_telemetry_snapshot() {
        let telemetry = Telemetry::new(4, Duration::from_millis(100), 9_000);
        assert!(!telemetry.snapshot().await.needs_escalation());

        telemetry.record(Duration::from_millis(10), true).await;
        telemetry.record(Duration::from_millis(20), true).await;
        telemetry.record(Duration::from_millis(30), true).await;
        telemetry.record(Duration::from_millis(500), false).await;

        let snapshot = telemetry.snapshot().await;
        assert_eq!(snapshot.calls, 4);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.mean_latency_ms, 140);
        assert_eq!(snapshot.p95_latency_ms, 500);
        assert_eq!(snapshot.sla_compliance_bps, 7_500);
        assert!(snapshot.needs_escalation());
    }

    #[tokio::test]
    async fn test_telemetry_window_is_bounded() {
        let telemetry = Telemetry::new(2, Duration::from_millis(100), 9_000);
        telemetry.record(Duration::from_millis(900), false).await;
        telemetry.record(Duration::from_millis(10), true).await;
        telemetry.record(Duration::from_millis(10), true).await;

        let snapshot = telemetry.snapshot().await;
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.sla_compliance_bps, 10_000);
    }
}
