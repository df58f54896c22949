//! # Sale Repository
//!
//! The sales feed written by the order-capture collaborator, and the daily
//! aggregates the consistency validator compares against the drawer ledger.
//!
//! ```text
//!   record_sale ──► sales (total_minor)        ──► raw_total(date)
//!               └─► sale_payments (method, amt) ──► totals_by_method(date)
//! ```
//!
//! The two aggregates are deliberately computed from different tables: a
//! sale whose tender lines don't add up to its total shows up as a
//! PAYMENT_METHODS_MISMATCH.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{MethodTotal, Money, SaleRecord};

/// Repository for the sales feed.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Records a completed sale and its tender lines in one transaction.
    ///
    /// Idempotent by sale id: returns `false` when the sale already exists.
    pub async fn record_sale(&self, sale: &SaleRecord) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sales (id, business_date, total_minor, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&sale.id)
        .bind(sale.business_date)
        .bind(sale.total_minor)
        .bind(sale.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(sale_id = %sale.id, "Sale already recorded");
            return Ok(false);
        }

        for payment in &sale.payments {
            sqlx::query(
                r#"
                INSERT INTO sale_payments (sale_id, method, amount_minor)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(&sale.id)
            .bind(payment.method)
            .bind(payment.amount_minor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            sale_id = %sale.id,
            business_date = %sale.business_date,
            total_minor = sale.total_minor,
            payments = sale.payments.len(),
            "Sale recorded"
        );
        Ok(true)
    }

    /// Per-payment-method totals for a business date.
    pub async fn totals_by_method(&self, business_date: NaiveDate) -> DbResult<Vec<MethodTotal>> {
        let totals = sqlx::query_as::<_, MethodTotal>(
            r#"
            SELECT p.method AS method, SUM(p.amount_minor) AS total_minor
            FROM sale_payments p
            JOIN sales s ON s.id = p.sale_id
            WHERE s.business_date = ?1
            GROUP BY p.method
            ORDER BY p.method
            "#,
        )
        .bind(business_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(totals)
    }

    /// Σ raw sale totals for a business date.
    pub async fn raw_total(&self, business_date: NaiveDate) -> DbResult<Money> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_minor), 0) FROM sales WHERE business_date = ?1",
        )
        .bind(business_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::from_minor(total))
    }
}
