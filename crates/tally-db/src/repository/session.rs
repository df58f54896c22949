//! # Drawer Session Repository
//!
//! Drawer session lifecycle and the atomic close.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Drawer Session Lifecycle                           │
//! │                                                                         │
//! │  1. OPEN                                                               │
//! │     └── open() → INSERT session + opening-float movement (one tx)      │
//! │         └── live-drawer UNIQUE index rejects a second live session     │
//! │                                                                         │
//! │  2. CLOSING                                                            │
//! │     └── begin_close() → UPDATE ... WHERE state = 'OPEN'                │
//! │         └── records operation id and counted amount                    │
//! │                                                                         │
//! │  3. CLOSED                                                             │
//! │     └── finalize_close() → SINGLE TRANSACTION:                         │
//! │         ├── read frozen movements                                      │
//! │         ├── plan_close (expected, classification, correction)          │
//! │         ├── INSERT AUTO_CORRECTION (if planned)                        │
//! │         ├── INSERT alerts (fingerprint dedupe)                         │
//! │         └── UPDATE ... SET state = 'CLOSED' WHERE state = 'CLOSING'    │
//! │                                                                         │
//! │  Replays with the same operation id return the stored outcome.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{alert, movement};
use tally_core::reconciliation::{auto_correction_movement, compute_expected, plan_close};
use tally_core::{
    AuditAnnotation, CoreError, DrawerSession, Money, MovementType, NewMovement,
    ReconciliationPolicy, ReconciliationResult, SessionState, OPENING_FLOAT_CATEGORY,
};

/// Movement id reserved for a session's opening float.
pub fn opening_movement_id(session_id: &str) -> String {
    format!("{session_id}:opening")
}

/// Repository for drawer session operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Creates a new SessionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    /// Opens a session and records its opening float as a MANUAL_INCOME
    /// movement, in one transaction.
    ///
    /// ## Idempotency
    /// `session_id` is chosen by the caller. Replaying the same id with the
    /// same drawer and amount returns the existing session.
    ///
    /// ## Errors
    /// - `Rule(DrawerAlreadyOpen)` when another session is OPEN or CLOSING
    ///   for the drawer
    /// - `Rule(OperationMismatch)` when the id was used with other arguments
    pub async fn open(
        &self,
        session_id: &str,
        drawer_id: &str,
        cashier_id: &str,
        opening: Money,
    ) -> DbResult<DrawerSession> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = fetch_by_id(&mut *tx, session_id).await? {
            return replayed_open(existing, drawer_id, opening);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO drawer_sessions (
                id, drawer_id, cashier_id, opened_at, opening_minor, state
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'OPEN')
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(drawer_id)
        .bind(cashier_id)
        .bind(now)
        .bind(opening.minor())
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            // The id conflict is absorbed above; any remaining UNIQUE hit is
            // the live-drawer index.
            DbError::UniqueViolation { .. } => DbError::Rule(CoreError::DrawerAlreadyOpen {
                drawer_id: drawer_id.to_string(),
            }),
            other => other,
        })?;

        if inserted.rows_affected() == 0 {
            let existing = fetch_by_id(&mut *tx, session_id)
                .await?
                .ok_or_else(|| DbError::conflict("Drawer session", session_id))?;
            return replayed_open(existing, drawer_id, opening);
        }

        let opening_movement = NewMovement {
            id: opening_movement_id(session_id),
            movement_type: MovementType::ManualIncome,
            amount: opening,
            category: OPENING_FLOAT_CATEGORY.to_string(),
            description: "Opening float".to_string(),
            reference: None,
            created_by: cashier_id.to_string(),
        };
        movement::insert_unguarded(&mut *tx, session_id, &opening_movement, now).await?;

        let session = fetch_by_id(&mut *tx, session_id)
            .await?
            .ok_or_else(|| DbError::not_found("Drawer session", session_id))?;

        tx.commit().await?;

        info!(
            session_id = %session_id,
            drawer_id = %drawer_id,
            cashier_id = %cashier_id,
            opening = %opening,
            "Drawer session opened"
        );

        Ok(session)
    }

    /// Gets a session by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<DrawerSession>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Finds the OPEN or CLOSING session holding a drawer.
    pub async fn find_live_by_drawer(&self, drawer_id: &str) -> DbResult<Option<DrawerSession>> {
        let session = sqlx::query_as::<_, DrawerSession>(
            r#"
            SELECT * FROM drawer_sessions
            WHERE drawer_id = ?1 AND state IN ('OPEN', 'CLOSING')
            "#,
        )
        .bind(drawer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Finds the session whose close is owned by `operation_id`.
    pub async fn find_by_close_operation(
        &self,
        operation_id: &str,
    ) -> DbResult<Option<DrawerSession>> {
        let session = sqlx::query_as::<_, DrawerSession>(
            "SELECT * FROM drawer_sessions WHERE close_operation_id = ?1",
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Moves a session OPEN → CLOSING, freezing its movement stream.
    ///
    /// ## Idempotency
    /// Replaying with the same operation id and counted amount returns the
    /// session as it stands (CLOSING or CLOSED).
    ///
    /// ## Errors
    /// - `Rule(OperationMismatch)` when the operation id is reused with a
    ///   different counted amount or on another session
    /// - `Rule(InvalidState)` when close already began under another id
    /// - `Rule(LedgerOverflow)` when `counted − expected` does not fit in
    ///   i64; the session stays OPEN
    pub async fn begin_close(
        &self,
        session_id: &str,
        operation_id: &str,
        counted: Money,
    ) -> DbResult<DrawerSession> {
        let mismatch = || {
            DbError::Rule(CoreError::OperationMismatch {
                operation_id: operation_id.to_string(),
            })
        };

        // A close that cannot be planned must not leave the drawer CLOSING.
        let movements = movement::fetch_for_session(&self.pool, session_id).await?;
        let plannable = compute_expected(&movements)
            .and_then(|expected| counted.checked_sub(expected))
            .is_some();
        if !plannable {
            return Err(DbError::Rule(CoreError::LedgerOverflow {
                session_id: session_id.to_string(),
            }));
        }

        let result = sqlx::query(
            r#"
            UPDATE drawer_sessions SET
                state = 'CLOSING',
                counted_minor = ?3,
                close_operation_id = ?2
            WHERE id = ?1 AND state = 'OPEN'
            "#,
        )
        .bind(session_id)
        .bind(operation_id)
        .bind(counted.minor())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => mismatch(),
            other => other,
        })?;

        let session = fetch_by_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| DbError::not_found("Drawer session", session_id))?;

        if result.rows_affected() == 1 {
            info!(
                session_id = %session_id,
                operation_id = %operation_id,
                counted = %counted,
                "Drawer session closing"
            );
            return Ok(session);
        }

        match session.close_operation_id.as_deref() {
            Some(op) if op == operation_id => {
                if session.counted_minor == Some(counted.minor()) {
                    debug!(session_id = %session_id, "Close request replayed");
                    Ok(session)
                } else {
                    Err(mismatch())
                }
            }
            _ => Err(DbError::Rule(CoreError::InvalidState {
                session_id: session.id,
                state: session.state,
                operation: "begin close".to_string(),
            })),
        }
    }

    /// Reconciles and closes a CLOSING session in one transaction.
    ///
    /// Replaying a completed close with the same operation id returns the
    /// stored result and writes nothing.
    pub async fn finalize_close(
        &self,
        session_id: &str,
        operation_id: &str,
        policy: &ReconciliationPolicy,
    ) -> DbResult<ReconciliationResult> {
        let mut tx = self.pool.begin().await?;

        let session = fetch_by_id(&mut *tx, session_id)
            .await?
            .ok_or_else(|| DbError::not_found("Drawer session", session_id))?;

        let owns_close = session.close_operation_id.as_deref() == Some(operation_id);

        match session.state {
            SessionState::Closed if owns_close => {
                let alerts = alert::fetch_for_session(&mut *tx, session_id).await?;
                debug!(session_id = %session_id, "Close replayed from stored result");
                return Ok(ReconciliationResult::from_closed_session(&session, alerts)?);
            }
            SessionState::Closing if owns_close => {}
            SessionState::Closing => {
                return Err(DbError::Rule(CoreError::OperationMismatch {
                    operation_id: operation_id.to_string(),
                }))
            }
            state => {
                return Err(DbError::Rule(CoreError::InvalidState {
                    session_id: session.id.clone(),
                    state,
                    operation: "finalize close".to_string(),
                }))
            }
        }

        let counted = session
            .counted()
            .ok_or_else(|| DbError::Internal(format!("session {session_id} CLOSING without count")))?;
        let movements = movement::fetch_for_session(&mut *tx, session_id).await?;
        let closed_at = Utc::now();

        let result = plan_close(&session, operation_id, counted, &movements, policy, closed_at)?;

        if let Some(correction) = auto_correction_movement(&result) {
            movement::insert_unguarded(&mut *tx, session_id, &correction, closed_at).await?;
        }

        for financial_alert in &result.alerts {
            alert::insert(&mut *tx, financial_alert).await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE drawer_sessions SET
                state = 'CLOSED',
                closed_at = ?3,
                expected_minor = ?4,
                discrepancy_minor = ?5,
                original_discrepancy_minor = ?6,
                auto_correction_minor = ?7,
                classification = ?8
            WHERE id = ?1 AND state = 'CLOSING' AND close_operation_id = ?2
            "#,
        )
        .bind(session_id)
        .bind(operation_id)
        .bind(closed_at)
        .bind(result.expected.minor())
        .bind(result.discrepancy.minor())
        .bind(result.original_discrepancy.minor())
        .bind(result.auto_correction.map(|m| m.minor()))
        .bind(result.classification)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::conflict("Drawer session", session_id));
        }

        tx.commit().await?;

        if result.requires_audit {
            warn!(
                session_id = %session_id,
                expected = %result.expected,
                counted = %result.counted,
                discrepancy = %result.discrepancy,
                "Drawer closed with discrepancy requiring audit"
            );
        } else {
            info!(
                session_id = %session_id,
                classification = %result.classification,
                original_discrepancy = %result.original_discrepancy,
                auto_corrected = result.auto_correction.is_some(),
                "Drawer session closed"
            );
        }

        Ok(result)
    }

    /// Appends an audit annotation. Allowed in every state, including CLOSED.
    pub async fn annotate(
        &self,
        session_id: &str,
        author: &str,
        note: &str,
    ) -> DbResult<AuditAnnotation> {
        let annotation = AuditAnnotation {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            author: author.to_string(),
            note: note.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO audit_annotations (id, session_id, author, note, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&annotation.id)
        .bind(&annotation.session_id)
        .bind(&annotation.author)
        .bind(&annotation.note)
        .bind(annotation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::ForeignKeyViolation { .. } => DbError::not_found("Drawer session", session_id),
            other => other,
        })?;

        debug!(session_id = %session_id, author = %author, "Audit annotation added");
        Ok(annotation)
    }

    /// Lists a session's annotations, oldest first.
    pub async fn annotations(&self, session_id: &str) -> DbResult<Vec<AuditAnnotation>> {
        let annotations = sqlx::query_as::<_, AuditAnnotation>(
            "SELECT * FROM audit_annotations WHERE session_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(annotations)
    }
}

fn replayed_open(existing: DrawerSession, drawer_id: &str, opening: Money) -> DbResult<DrawerSession> {
    if existing.drawer_id != drawer_id || existing.opening_minor != opening.minor() {
        return Err(DbError::Rule(CoreError::OperationMismatch {
            operation_id: existing.id,
        }));
    }
    debug!(session_id = %existing.id, "Session open replayed");
    Ok(existing)
}

pub(crate) async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<DrawerSession>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let session = sqlx::query_as::<_, DrawerSession>("SELECT * FROM drawer_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(session)
}

// =============================================================================
// Unit Tests
// =============================================================================
