//! # Ledger Wiring
//!
//! Builds the service graph around one store.
//!
//! ```text
//!   Database ──► ResilientStore ──┬──► AlertSink
//!                                 ├──► ReconciliationEngine ──► DrawerService
//!                                 └──► ConsistencyValidator
//! ```

use std::sync::Arc;

use tracing::info;

use crate::alerts::AlertSink;
use crate::config::LedgerConfig;
use crate::consistency::ConsistencyValidator;
use crate::drawer::DrawerService;
use crate::error::EngineResult;
use crate::reconcile::ReconciliationEngine;
use crate::resilience::{ResilientStore, TelemetrySnapshot};
use crate::store::LedgerStore;
use tally_core::Money;
use tally_db::{Database, DbConfig};

/// All engine services sharing one resilient store.
pub struct Ledger {
    store: Arc<ResilientStore>,
    pub drawers: DrawerService,
    pub reconciler: Arc<ReconciliationEngine>,
    pub validator: ConsistencyValidator,
    pub alerts: AlertSink,
}

impl Ledger {
    /// Wraps `backend` in the resilience layer and builds every service on it.
    pub fn new(backend: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        let store = Arc::new(ResilientStore::new(backend, &config.resilience));
        let shared: Arc<dyn LedgerStore> = store.clone();

        let alerts = AlertSink::new(shared.clone());
        let reconciler = Arc::new(ReconciliationEngine::new(
            shared.clone(),
            alerts.clone(),
            config.policy(),
        ));
        let drawers = DrawerService::new(shared.clone(), reconciler.clone());
        let validator = ConsistencyValidator::new(
            shared,
            alerts.clone(),
            Money::from_minor(config.reconciliation.tolerance_epsilon),
        );

        Ledger {
            store,
            drawers,
            reconciler,
            validator,
            alerts,
        }
    }

    /// Opens the SQLite store named in `config` and wires the services.
    pub async fn connect(config: &LedgerConfig) -> EngineResult<(Self, Database)> {
        let db_config = DbConfig::new(config.database.path.clone())
            .max_connections(config.database.max_connections);
        let db = Database::new(db_config).await?;
        info!(path = ?config.database.path, "Ledger store ready");

        let ledger = Ledger::new(Arc::new(db.clone()), config);
        Ok((ledger, db))
    }

    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.store.telemetry().await
    }

    pub fn store(&self) -> &ResilientStore {
        &self.store
    }
}
