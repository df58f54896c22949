//! # Financial Alert Repository
//!
//! Append-only alert storage with fingerprint dedupe.
//!
//! `INSERT ... ON CONFLICT(fingerprint) DO NOTHING` makes persisting an alert
//! idempotent: a replayed close or a re-run daily scan over unchanged data
//! inserts nothing, and the caller learns that from the returned flag.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{AlertSeverity, AlertType, FinancialAlert};

/// Repository for financial alerts.
#[derive(Debug, Clone)]
pub struct AlertRepository {
    pool: SqlitePool,
}

impl AlertRepository {
    /// Creates a new AlertRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AlertRepository { pool }
    }

    /// Persists an alert; `false` when an alert with the same fingerprint
    /// already exists.
    pub async fn append(&self, alert: &FinancialAlert) -> DbResult<bool> {
        insert(&self.pool, alert).await
    }

    /// Alerts about a business date, oldest first.
    pub async fn list_for_date(&self, business_date: NaiveDate) -> DbResult<Vec<FinancialAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM financial_alerts
            WHERE business_date = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(business_date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertRow::into_alert).collect()
    }

    /// Alerts raised by a session's close.
    pub async fn list_for_session(&self, session_id: &str) -> DbResult<Vec<FinancialAlert>> {
        fetch_for_session(&self.pool, session_id).await
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: String,
    fingerprint: String,
    created_at: DateTime<Utc>,
    business_date: NaiveDate,
    alert_type: String,
    severity: String,
    session_id: Option<String>,
    payload: String,
    requires_action: bool,
}

impl AlertRow {
    fn into_alert(self) -> DbResult<FinancialAlert> {
        let alert_type = AlertType::parse(&self.alert_type)
            .ok_or_else(|| DbError::Internal(format!("unknown alert type {}", self.alert_type)))?;
        let severity = AlertSeverity::parse(&self.severity)
            .ok_or_else(|| DbError::Internal(format!("unknown severity {}", self.severity)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| DbError::Internal(format!("alert {} payload: {e}", self.id)))?;

        Ok(FinancialAlert {
            id: self.id,
            created_at: self.created_at,
            business_date: self.business_date,
            alert_type,
            severity,
            session_id: self.session_id,
            payload,
            requires_action: self.requires_action,
            fingerprint: self.fingerprint,
        })
    }
}

// =============================================================================
// Executor-level helpers (shared with the close transaction)
// =============================================================================

pub(crate) async fn insert<'e, E>(executor: E, alert: &FinancialAlert) -> DbResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&alert.payload)
        .map_err(|e| DbError::Internal(format!("alert payload: {e}")))?;

    let result = sqlx::query(
        r#"
        INSERT INTO financial_alerts (
            id, fingerprint, created_at, business_date, alert_type,
            severity, session_id, payload, requires_action
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(&alert.id)
    .bind(&alert.fingerprint)
    .bind(alert.created_at)
    .bind(alert.business_date)
    .bind(alert.alert_type.as_str())
    .bind(alert.severity.as_str())
    .bind(&alert.session_id)
    .bind(payload)
    .bind(alert.requires_action)
    .execute(executor)
    .await?;

    let inserted = result.rows_affected() == 1;
    debug!(
        alert_type = %alert.alert_type,
        fingerprint = %alert.fingerprint,
        inserted,
        "Financial alert persisted"
    );
    Ok(inserted)
}

pub(crate) async fn fetch_for_session<'e, E>(
    executor: E,
    session_id: &str,
) -> DbResult<Vec<FinancialAlert>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, AlertRow>(
        "SELECT * FROM financial_alerts WHERE session_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(session_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(AlertRow::into_alert).collect()
}
