//! # Drawer Service
//!
//! The drawer session state machine and movement recorder, as exposed to
//! order capture and back-office collaborators.
//!
//! ## Lifecycle
//! ```text
//!   open(drawer, cashier, float)
//!        │   opening float recorded as MANUAL_INCOME
//!        ▼
//!      OPEN ◄──── record_cash_movement / append (idempotent by movement id)
//!        │
//!        │ request_close(counted, op) / close_drawer(drawer, counted)
//!        ▼
//!    CLOSING ──── movements rejected
//!        │ reconciliation (same transaction as the transition below)
//!        ▼
//!     CLOSED ──── annotate only
//! ```
//!
//! Drawer ownership is enforced by the store's uniqueness constraint, so two
//! processes racing to open the same drawer get one session and one
//! `InvalidState`.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::reconcile::ReconciliationEngine;
use crate::store::LedgerStore;
use tally_core::validation::{
    validate_counted_amount, validate_external_movement_type, validate_id,
    validate_movement_amount, validate_opening_amount, validate_text,
};
use tally_core::{
    AuditAnnotation, CoreError, DrawerSession, Money, Movement, MovementType, NewMovement,
    ReconciliationResult, SessionState,
};

/// Drawer lifecycle and movement recording.
pub struct DrawerService {
    store: Arc<dyn LedgerStore>,
    reconciler: Arc<ReconciliationEngine>,
}

impl DrawerService {
    pub fn new(store: Arc<dyn LedgerStore>, reconciler: Arc<ReconciliationEngine>) -> Self {
        DrawerService { store, reconciler }
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Opens a session on a drawer.
    ///
    /// ## Errors
    /// - `Validation` for a negative float or malformed ids
    /// - `InvalidState` when the drawer already has an OPEN or CLOSING session
    pub async fn open(
        &self,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> EngineResult<DrawerSession> {
        validate_id("drawer id", drawer_id)?;
        validate_id("cashier id", cashier_id)?;
        validate_opening_amount(opening)?;

        if self.store.find_live_session(drawer_id).await?.is_some() {
            return Err(CoreError::DrawerAlreadyOpen {
                drawer_id: drawer_id.to_string(),
            }
            .into());
        }

        // Generated before the retry loop so every attempt carries one id.
        let session_id = Uuid::new_v4().to_string();
        let session = self
            .store
            .open_session(&session_id, drawer_id, cashier_id, opening)
            .await?;

        info!(
            session_id = %session.id,
            drawer_id = %drawer_id,
            cashier_id = %cashier_id,
            opening = %opening,
            "Drawer opened"
        );
        Ok(session)
    }

    // =========================================================================
    // Movements
    // =========================================================================

    /// Appends a movement to an OPEN session, idempotently by `movement.id`.
    pub async fn append(&self, session_id: &str, movement: NewMovement) -> EngineResult<Movement> {
        validate_id("session id", session_id)?;
        validate_id("movement id", &movement.id)?;
        validate_external_movement_type(movement.movement_type)?;
        validate_movement_amount(movement.amount)?;
        validate_text("description", &movement.description)?;
        validate_text("category", &movement.category)?;

        let recorded = self.store.append_movement(session_id, &movement).await?;
        debug!(
            session_id = %session_id,
            movement_id = %recorded.id,
            movement_type = %recorded.movement_type,
            amount = %recorded.amount(),
            "Movement recorded"
        );
        Ok(recorded)
    }

    /// Records a movement against whatever session currently holds the drawer.
    ///
    /// `amount` is a positive magnitude; the movement type decides the sign.
    /// Returns the new movement id.
    pub async fn record_cash_movement(
        &self,
        drawer_id: &str,
        movement_type: MovementType,
        amount: Money,
        description: &str,
    ) -> EngineResult<String> {
        validate_id("drawer id", drawer_id)?;
        validate_external_movement_type(movement_type)?;
        validate_movement_amount(amount)?;

        let session = self.open_session_for(drawer_id).await?;
        let movement = NewMovement {
            id: Uuid::new_v4().to_string(),
            movement_type,
            amount,
            category: movement_type.as_str().to_string(),
            description: description.to_string(),
            reference: None,
            created_by: session.cashier_id.clone(),
        };

        let recorded = self.append(&session.id, movement).await?;
        Ok(recorded.id)
    }

    pub async fn movements(&self, session_id: &str) -> EngineResult<Vec<Movement>> {
        self.store.list_movements(session_id).await
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Closes a session against a physical count.
    ///
    /// Idempotent on `operation_id`: replaying while CLOSING resumes the
    /// close, replaying after CLOSED returns the stored result. Reusing the
    /// id with another amount is `InvalidState`.
    ///
    /// Never retried internally. A transient failure surfaces as
    /// `RetryWithOperationId` so the caller replays with the same id.
    pub async fn request_close(
        &self,
        session_id: &str,
        counted: Money,
        operation_id: &str,
    ) -> EngineResult<ReconciliationResult> {
        validate_id("session id", session_id)?;
        validate_id("operation id", operation_id)?;
        validate_counted_amount(counted)?;

        self.reconciler
            .reconcile(session_id, counted, operation_id)
            .await
            .map_err(|err| match err {
                EngineError::TransientIo(reason) => EngineError::RetryWithOperationId {
                    operation_id: operation_id.to_string(),
                    reason,
                },
                EngineError::ServiceDegraded { retry_after } => EngineError::RetryWithOperationId {
                    operation_id: operation_id.to_string(),
                    reason: format!("ledger store degraded, retry after {retry_after:?}"),
                },
                other => other,
            })
    }

    /// Closes whatever session holds the drawer, under a fresh operation id.
    pub async fn close_drawer(
        &self,
        drawer_id: &str,
        counted: Money,
    ) -> EngineResult<ReconciliationResult> {
        let operation_id = Uuid::new_v4().to_string();
        self.close_drawer_with_operation(drawer_id, counted, &operation_id)
            .await
    }

    /// Closes a drawer under a caller-chosen operation id.
    ///
    /// A replay after the drawer was released still finds the session
    /// through the operation id.
    pub async fn close_drawer_with_operation(
        &self,
        drawer_id: &str,
        counted: Money,
        operation_id: &str,
    ) -> EngineResult<ReconciliationResult> {
        validate_id("drawer id", drawer_id)?;
        validate_id("operation id", operation_id)?;
        validate_counted_amount(counted)?;

        let owner = self
            .store
            .find_session_by_close_operation(operation_id)
            .await?;
        let session = match owner {
            Some(session) if session.drawer_id == drawer_id => session,
            Some(_) => {
                return Err(CoreError::OperationMismatch {
                    operation_id: operation_id.to_string(),
                }
                .into())
            }
            None => self.store.find_live_session(drawer_id).await?.ok_or_else(|| {
                EngineError::from(CoreError::DrawerNotOpen {
                    drawer_id: drawer_id.to_string(),
                })
            })?,
        };

        self.request_close(&session.id, counted, operation_id).await
    }

    // =========================================================================
    // Queries & Annotations
    // =========================================================================

    /// Current state of a session.
    pub async fn state(&self, session_id: &str) -> EngineResult<DrawerSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Drawer session {session_id}")))
    }

    /// The OPEN or CLOSING session on a drawer, if any.
    pub async fn current_session(&self, drawer_id: &str) -> EngineResult<Option<DrawerSession>> {
        self.store.find_live_session(drawer_id).await
    }

    /// Appends an audit note. Allowed on CLOSED sessions; figures never change.
    pub async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> EngineResult<AuditAnnotation> {
        validate_id("author", author)?;
        validate_text("note", note)?;
        if note.trim().is_empty() {
            return Err(tally_core::ValidationError::Required {
                field: "note".to_string(),
            }
            .into());
        }
        self.store.annotate(session_id, author, note).await
    }

    pub async fn annotations(&self, session_id: &str) -> EngineResult<Vec<AuditAnnotation>> {
        self.store.annotations(session_id).await
    }

    async fn open_session_for(&self, drawer_id: &str) -> EngineResult<DrawerSession> {
        let session = self.store.find_live_session(drawer_id).await?.ok_or_else(|| {
            EngineError::from(CoreError::DrawerNotOpen {
                drawer_id: drawer_id.to_string(),
            })
        })?;

        if session.state != SessionState::Open {
            return Err(CoreError::InvalidState {
                session_id: session.id,
                state: session.state,
                operation: "record movement".to_string(),
            }
            .into());
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use tally_core::ReconciliationPolicy;
    use tally_db::{Database, DbConfig};

    async fn service() -> DrawerService {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(db);
        let reconciler = ReconciliationEngine::new(
            store.clone(),
            AlertSink::new(store.clone()),
            ReconciliationPolicy::default(),
        );
        DrawerService::new(store, Arc::new(reconciler))
    }

    #[tokio::test]
    async fn test_open_rejects_negative_float() {
        let service = service().await;
        let err = service
            .open("drawer-1", "cashier-1", Money::from_minor(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_second_open_is_invalid_state() {
        let service = service().await;
        service
            .open("drawer-1", "cashier-1", Money::from_minor(10_000))
            .await
            .unwrap();
        let err = service
            .open("drawer-1", "cashier-2", Money::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // Other drawers are unaffected
        service
            .open("drawer-2", "cashier-2", Money::zero())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_requires_open_drawer() {
        let service = service().await;
        let err = service
            .record_cash_movement(
                "drawer-1",
                MovementType::SaleCash,
                Money::from_minor(100),
                "sale",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_record_rejects_malformed_amount_and_internal_type() {
        let service = service().await;
        service
            .open("drawer-1", "cashier-1", Money::zero())
            .await
            .unwrap();

        let err = service
            .record_cash_movement("drawer-1", MovementType::SaleCash, Money::zero(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = service
            .record_cash_movement(
                "drawer-1",
                MovementType::AutoCorrection,
                Money::from_minor(10),
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_movements_rejected_after_close() {
        let service = service().await;
        let session = service
            .open("drawer-1", "cashier-1", Money::from_minor(1_000))
            .await
            .unwrap();
        service
            .close_drawer("drawer-1", Money::from_minor(1_000))
            .await
            .unwrap();

        let err = service
            .append(
                &session.id,
                NewMovement {
                    id: "late".to_string(),
                    movement_type: MovementType::SaleCash,
                    amount: Money::from_minor(100),
                    category: "SALE_CASH".to_string(),
                    description: String::new(),
                    reference: None,
                    created_by: "cashier-1".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let closed = service.state(&session.id).await.unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert!(service.current_session("drawer-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_operation_id_reuse_with_other_amount() {
        let service = service().await;
        let session = service
            .open("drawer-1", "cashier-1", Money::from_minor(1_000))
            .await
            .unwrap();
        service
            .request_close(&session.id, Money::from_minor(1_000), "op-1")
            .await
            .unwrap();

        let err = service
            .request_close(&session.id, Money::from_minor(900), "op-1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_annotate_closed_session() {
        let service = service().await;
        let session = service
            .open("drawer-1", "cashier-1", Money::zero())
            .await
            .unwrap();
        service.close_drawer("drawer-1", Money::zero()).await.unwrap();

        service
            .annotate(&session.id, "auditor-1", "Count verified by supervisor")
            .await
            .unwrap();
        assert_eq!(service.annotations(&session.id).await.unwrap().len(), 1);

        let err = service
            .annotate(&session.id, "auditor-1", "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
