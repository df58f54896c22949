//! # Movement Repository
//!
//! Append-only, idempotent storage of signed drawer movements.
//!
//! ## Append Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SINGLE TRANSACTION                                  │
//! │                                                                         │
//! │  1. SELECT movement by id                                              │
//! │     └── found? same session/type/amount → return it (replay)           │
//! │                 anything different       → OperationMismatch           │
//! │                                                                         │
//! │  2. Cash balance after the movement must stay within the ceiling       │
//! │     └── otherwise BalanceLimit, nothing written                        │
//! │                                                                         │
//! │  3. INSERT ... SELECT FROM drawer_sessions                             │
//! │        WHERE id = ? AND state = 'OPEN'                                 │
//! │     └── the OPEN check and the insert are one statement                │
//! │                                                                         │
//! │  4. 0 rows? → NotFound (no session) or InvalidState (CLOSING/CLOSED)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The terminal AUTO_CORRECTION is written by the close transaction through
//! [`insert_unguarded`], never through [`MovementRepository::append`].

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::session;
use tally_core::reconciliation::compute_expected;
use tally_core::{CashEffect, CoreError, Money, Movement, NewMovement};

/// Repository for movement database operations.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    /// Creates a new MovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// Idempotently appends a movement to an OPEN session.
    ///
    /// Re-submitting the same movement id returns the stored movement and
    /// writes nothing.
    pub async fn append(&self, session_id: &str, movement: &NewMovement) -> DbResult<Movement> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = fetch_by_id(&mut *tx, &movement.id).await? {
            ensure_same(&existing, session_id, movement)?;
            debug!(id = %existing.id, "Movement replayed");
            return Ok(existing);
        }

        ensure_within_balance_limit(&mut *tx, session_id, movement).await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO movements (
                id, session_id, movement_type, amount_minor,
                category, description, reference,
                business_date, created_at, created_by
            )
            SELECT ?1, id, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
            FROM drawer_sessions
            WHERE id = ?2 AND state = 'OPEN'
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&movement.id)
        .bind(session_id)
        .bind(movement.movement_type)
        .bind(movement.signed_amount().minor())
        .bind(&movement.category)
        .bind(&movement.description)
        .bind(&movement.reference)
        .bind(now.date_naive())
        .bind(now)
        .bind(&movement.created_by)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            if let Some(existing) = fetch_by_id(&mut *tx, &movement.id).await? {
                ensure_same(&existing, session_id, movement)?;
                return Ok(existing);
            }
            return Err(match session::fetch_by_id(&mut *tx, session_id).await? {
                None => DbError::not_found("Drawer session", session_id),
                Some(s) => DbError::Rule(CoreError::InvalidState {
                    session_id: s.id,
                    state: s.state,
                    operation: "append movement".to_string(),
                }),
            });
        }

        let stored = fetch_by_id(&mut *tx, &movement.id)
            .await?
            .ok_or_else(|| DbError::not_found("Movement", &movement.id))?;

        tx.commit().await?;

        debug!(
            id = %stored.id,
            session_id = %session_id,
            movement_type = %stored.movement_type,
            amount_minor = stored.amount_minor,
            "Movement appended"
        );

        Ok(stored)
    }

    /// Gets a movement by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Movement>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Lists a session's movements in insertion order.
    pub async fn list_for_session(&self, session_id: &str) -> DbResult<Vec<Movement>> {
        fetch_for_session(&self.pool, session_id).await
    }

    /// Σ SALE_CASH recorded in drawer ledgers on a business date.
    pub async fn cash_from_sales(&self, business_date: NaiveDate) -> DbResult<Money> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_minor), 0)
            FROM movements
            WHERE business_date = ?1 AND movement_type = 'SALE_CASH'
            "#,
        )
        .bind(business_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_minor(total))
    }
}

// =============================================================================
// Executor-level helpers (shared with the close transaction)
// =============================================================================

pub(crate) async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<Movement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let movement = sqlx::query_as::<_, Movement>("SELECT * FROM movements WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(movement)
}

pub(crate) async fn fetch_for_session<'e, E>(executor: E, session_id: &str) -> DbResult<Vec<Movement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let movements = sqlx::query_as::<_, Movement>(
        "SELECT * FROM movements WHERE session_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(session_id)
    .fetch_all(executor)
    .await?;
    Ok(movements)
}

/// Inserts without the OPEN guard. Only for the opening float and the
/// close-time AUTO_CORRECTION, both keyed by reserved ids.
pub(crate) async fn insert_unguarded<'e, E>(
    executor: E,
    session_id: &str,
    movement: &NewMovement,
    at: DateTime<Utc>,
) -> DbResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO movements (
            id, session_id, movement_type, amount_minor,
            category, description, reference,
            business_date, created_at, created_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&movement.id)
    .bind(session_id)
    .bind(movement.movement_type)
    .bind(movement.signed_amount().minor())
    .bind(&movement.category)
    .bind(&movement.description)
    .bind(&movement.reference)
    .bind(at.date_naive())
    .bind(at)
    .bind(&movement.created_by)
    .execute(executor)
    .await?;
    Ok(())
}

/// Rejects a cash movement that would take the running balance past
/// [`tally_core::money::MAX_AMOUNT_MINOR`], so the close-time sum can never
/// overflow.
async fn ensure_within_balance_limit(
    conn: &mut SqliteConnection,
    session_id: &str,
    movement: &NewMovement,
) -> DbResult<()> {
    if movement.movement_type.cash_effect() == CashEffect::NonCash {
        return Ok(());
    }

    let movements = fetch_for_session(&mut *conn, session_id).await?;
    let within = compute_expected(&movements)
        .and_then(|balance| balance.checked_add(movement.signed_amount()))
        .is_some_and(|balance| balance.is_within_limit());
    if within {
        Ok(())
    } else {
        Err(DbError::Rule(CoreError::BalanceLimit {
            session_id: session_id.to_string(),
            movement_id: movement.id.clone(),
        }))
    }
}

fn ensure_same(existing: &Movement, session_id: &str, movement: &NewMovement) -> DbResult<()> {
    let same = existing.session_id == session_id
        && existing.movement_type == movement.movement_type
        && existing.amount_minor == movement.signed_amount().minor();
    if same {
        Ok(())
    } else {
        Err(DbError::Rule(CoreError::OperationMismatch {
            operation_id: existing.id.clone(),
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
