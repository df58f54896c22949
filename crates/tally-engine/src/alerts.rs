//! # Alert Sink
//!
//! Append-only stream of financial alerts.
//!
//! ```text
//!   ReconciliationEngine ─┐                    ┌──► AlertSubscription (HIGH+)
//!                         ├─► AlertSink ──► broadcast ──► AlertSubscription (date)
//!   ConsistencyValidator ─┘       │
//!                                 ▼
//!                     financial_alerts (fingerprint UNIQUE)
//! ```
//!
//! Delivery is at-least-once: a replayed close re-announces its alerts.
//! Consumers dedupe on `FinancialAlert::fingerprint`.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::store::LedgerStore;
use tally_core::{AlertSeverity, FinancialAlert};

/// Buffered alerts per subscriber before it starts lagging.
pub const ALERT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Subscription Filter
// =============================================================================

/// Which alerts a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertFilter {
    pub min_severity: AlertSeverity,
    /// Restrict to one business date.
    pub business_date: Option<NaiveDate>,
}

impl AlertFilter {
    /// Every alert.
    pub fn all() -> Self {
        AlertFilter {
            min_severity: AlertSeverity::Low,
            business_date: None,
        }
    }

    pub fn min_severity(severity: AlertSeverity) -> Self {
        AlertFilter {
            min_severity: severity,
            business_date: None,
        }
    }

    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.business_date = Some(date);
        self
    }

    pub fn matches(&self, alert: &FinancialAlert) -> bool {
        alert.severity >= self.min_severity
            && self.business_date.map_or(true, |d| d == alert.business_date)
    }
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// Alert Sink
// =============================================================================

/// Persists alerts and fans them out to live subscribers.
#[derive(Clone)]
pub struct AlertSink {
    store: Arc<dyn LedgerStore>,
    tx: broadcast::Sender<FinancialAlert>,
}

impl AlertSink {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        AlertSink { store, tx }
    }

    /// Persists one alert and broadcasts it if it was new.
    ///
    /// Returns `false` when an alert with the same fingerprint already exists.
    pub async fn publish(&self, alert: FinancialAlert) -> EngineResult<bool> {
        let inserted = self.store.append_alert(&alert).await?;
        if inserted {
            self.announce(alert);
        } else {
            debug!(fingerprint = %alert.fingerprint, "Duplicate alert suppressed");
        }
        Ok(inserted)
    }

    /// Broadcasts an alert that was already persisted elsewhere, such as
    /// inside the close transaction.
    pub fn announce(&self, alert: FinancialAlert) {
        debug!(
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            fingerprint = %alert.fingerprint,
            "Alert published"
        );
        // No live subscribers is fine; the alert is already stored.
        let _ = self.tx.send(alert);
    }

    pub fn subscribe(&self, filter: AlertFilter) -> AlertSubscription {
        AlertSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Replays persisted alerts for a business date.
    pub async fn alerts_for(&self, business_date: NaiveDate) -> EngineResult<Vec<FinancialAlert>> {
        self.store.list_alerts(business_date).await
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A filtered live view of the alert stream.
pub struct AlertSubscription {
    rx: broadcast::Receiver<FinancialAlert>,
    filter: AlertFilter,
}

impl AlertSubscription {
    /// Waits for the next matching alert. `None` once the sink is dropped.
    ///
    /// A lagging subscriber skips what it missed; `alerts_for` recovers it.
    pub async fn recv(&mut self) -> Option<FinancialAlert> {
        loop {
            match self.rx.recv().await {
                Ok(alert) if self.filter.matches(&alert) => return Some(alert),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Alert subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &AlertFilter {
        &self.filter
    }
}
