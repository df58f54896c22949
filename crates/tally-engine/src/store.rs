//! # Ledger Store Seam
//!
//! Everything the engine needs from persistence, as one object-safe async
//! trait. Services hold an `Arc<dyn LedgerStore>`; in production that is the
//! [`ResilientStore`](crate::resilience::ResilientStore) wrapping the SQLite
//! [`Database`], in tests it may be a fault-injecting wrapper.
//!
//! ```text
//!   DrawerService ─┐
//!   Reconciliation ├──► dyn LedgerStore ──► ResilientStore ──► Database
//!   Consistency ───┘                         (breaker, retry)   (tally-db)
//! ```
//!
//! Implementations must keep `finalize_close` atomic and make
//! `open_session`, `append_movement` and `begin_close` idempotent on their
//! caller-supplied ids.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::EngineResult;
use tally_core::{
    AuditAnnotation, DrawerSession, FinancialAlert, MethodTotal, Money, Movement, NewMovement,
    ReconciliationPolicy, ReconciliationResult,
};
use tally_db::Database;

/// Transactional persistence consumed by the engine.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Sessions
    // =========================================================================

    /// Opens a session and records its opening float. Idempotent on `session_id`.
    async fn open_session(
        &self,
        session_id: &str,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> EngineResult<DrawerSession>;

    async fn get_session(&self, session_id: &str) -> EngineResult<Option<DrawerSession>>;

    /// The OPEN or CLOSING session holding the drawer, if any.
    async fn find_live_session(&self, drawer_id: &str) -> EngineResult<Option<DrawerSession>>;

    /// The session whose close is owned by `operation_id`, in any state.
    async fn find_session_by_close_operation(
        &self,
        operation_id: &str,
    ) -> EngineResult<Option<DrawerSession>>;

    /// OPEN → CLOSING. Idempotent on `operation_id` with the same amount.
    async fn begin_close(
        &self,
        session_id: &str,
        operation_id: &str,
        counted: Money,
    ) -> EngineResult<DrawerSession>;

    /// CLOSING → CLOSED, reconciling in the same transaction.
    async fn finalize_close(
        &self,
        session_id: &str,
        operation_id: &str,
        policy: &ReconciliationPolicy,
    ) -> EngineResult<ReconciliationResult>;

    async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> EngineResult<AuditAnnotation>;

    async fn annotations(&self, session_id: &str) -> EngineResult<Vec<AuditAnnotation>>;

    // =========================================================================
    // Movements
    // =========================================================================

    /// Appends to an OPEN session. Idempotent on `movement.id`.
    async fn append_movement(
        &self,
        session_id: &str,
        movement: &NewMovement,
    ) -> EngineResult<Movement>;

    async fn list_movements(&self, session_id: &str) -> EngineResult<Vec<Movement>>;

    // =========================================================================
    // Daily aggregates
    // =========================================================================

    /// Sales totals grouped by payment method.
    async fn query_sales_aggregate(&self, business_date: NaiveDate)
        -> EngineResult<Vec<MethodTotal>>;

    async fn raw_sales_total(&self, business_date: NaiveDate) -> EngineResult<Money>;

    /// Σ SALE_CASH movements recorded in drawer ledgers on the date.
    async fn ledger_cash_from_sales(&self, business_date: NaiveDate) -> EngineResult<Money>;

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Persists an alert; `false` when its fingerprint was already stored.
    async fn append_alert(&self, alert: &FinancialAlert) -> EngineResult<bool>;

    async fn list_alerts(&self, business_date: NaiveDate) -> EngineResult<Vec<FinancialAlert>>;

    async fn session_alerts(&self, session_id: &str) -> EngineResult<Vec<FinancialAlert>>;
}

// =============================================================================
// SQLite implementation
// =============================================================================

#[async_trait]
impl LedgerStore for Database {
    async fn open_session(
        &self,
        session_id: &str,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> EngineResult<DrawerSession> {
        Ok(self
            .sessions()
            .open(session_id, drawer_id, cashier_id, opening)
            .await?)
    }

    async fn get_session(&self, session_id: &str) -> EngineResult<Option<DrawerSession>> {
        Ok(self.sessions().get_by_id(session_id).await?)
    }

    async fn find_live_session(&self, drawer_id: &str) -> EngineResult<Option<DrawerSession>> {
        Ok(self.sessions().find_live_by_drawer(drawer_id).await?)
    }

    async fn find_session_by_close_operation(
        &self,
        operation_id: &str,
    ) -> EngineResult<Option<DrawerSession>> {
        Ok(self.sessions().find_by_close_operation(operation_id).await?)
    }

    async fn begin_close(
        &self,
        session_id: &str,
        operation_id: &str,
        counted: Money,
    ) -> EngineResult<DrawerSession> {
        Ok(self
            .sessions()
            .begin_close(session_id, operation_id, counted)
            .await?)
    }

    async fn finalize_close(
        &self,
        session_id: &str,
        operation_id: &str,
        policy: &ReconciliationPolicy,
    ) -> EngineResult<ReconciliationResult> {
        Ok(self
            .sessions()
            .finalize_close(session_id, operation_id, policy)
            .await?)
    }

    async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> EngineResult<AuditAnnotation> {
        Ok(self.sessions().annotate(session_id, author, note).await?)
    }

    async fn annotations(&self, session_id: &str) -> EngineResult<Vec<AuditAnnotation>> {
        Ok(self.sessions().annotations(session_id).await?)
    }

    async fn append_movement(
        &self,
        session_id: &str,
        movement: &NewMovement,
    ) -> EngineResult<Movement> {
        Ok(self.movements().append(session_id, movement).await?)
    }

    async fn list_movements(&self, session_id: &str) -> EngineResult<Vec<Movement>> {
        Ok(self.movements().list_for_session(session_id).await?)
    }

    async fn query_sales_aggregate(
        &self,
        business_date: NaiveDate,
    ) -> EngineResult<Vec<MethodTotal>> {
        Ok(self.sales().totals_by_method(business_date).await?)
    }

    async fn raw_sales_total(&self, business_date: NaiveDate) -> EngineResult<Money> {
        Ok(self.sales().raw_total(business_date).await?)
    }

    async fn ledger_cash_from_sales(&self, business_date: NaiveDate) -> EngineResult<Money> {
        Ok(self.movements().cash_from_sales(business_date).await?)
    }

    async fn append_alert(&self, alert: &FinancialAlert) -> EngineResult<bool> {
        Ok(self.alerts().append(alert).await?)
    }

    async fn list_alerts(&self, business_date: NaiveDate) -> EngineResult<Vec<FinancialAlert>> {
        Ok(self.alerts().list_for_date(business_date).await?)
    }

    async fn session_alerts(&self, session_id: &str) -> EngineResult<Vec<FinancialAlert>> {
        Ok(self.alerts().list_for_session(session_id).await?)
    }
}
