//! # tally-engine: Drawer Lifecycle & Reconciliation Services
//!
//! Async services that drive drawer sessions from open to reconciled close,
//! cross-check daily totals and publish financial alerts.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Engine Architecture                             │
//! │                                                                         │
//! │   order capture / back office                                           │
//! │            │                                                            │
//! │            ▼                                                            │
//! │  ┌──────────────────┐   ┌──────────────────────┐   ┌────────────────┐  │
//! │  │  DrawerService   │──►│ ReconciliationEngine │   │ Consistency    │  │
//! │  │  open, record,   │   │ compute_expected     │   │ Validator      │  │
//! │  │  close, annotate │   │ reconcile            │   │ daily / range  │  │
//! │  └────────┬─────────┘   └──────────┬───────────┘   └───────┬────────┘  │
//! │           │                        │                       │           │
//! │           └────────────┬───────────┴───────────┬───────────┘           │
//! │                        ▼                       ▼                        │
//! │           ┌──────────────────────────┐   ┌───────────┐                 │
//! │           │ ResilientStore           │   │ AlertSink │──► subscribers  │
//! │           │ breaker, retry, timeout, │   └───────────┘                 │
//! │           │ telemetry                │                                  │
//! │           └────────────┬─────────────┘                                  │
//! │                        ▼                                                │
//! │                 dyn LedgerStore  (tally-db Database)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_engine::{Ledger, LedgerConfig};
//!
//! let config = LedgerConfig::load(None)?;
//! let (ledger, _db) = Ledger::connect(&config).await?;
//!
//! ledger.drawers.open("drawer-1", "cashier-1", Money::from_minor(10_000)).await?;
//! let result = ledger.drawers.close_drawer("drawer-1", Money::from_minor(14_500)).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod alerts;
pub mod config;
pub mod consistency;
pub mod drawer;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod resilience;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use alerts::{AlertFilter, AlertSink, AlertSubscription};
pub use config::LedgerConfig;
pub use consistency::ConsistencyValidator;
pub use drawer::DrawerService;
pub use error::{EngineError, EngineResult};
pub use ledger::Ledger;
pub use reconcile::ReconciliationEngine;
pub use resilience::{BreakerPermit, BreakerState, CircuitBreaker, ResilientStore, TelemetrySnapshot};
pub use store::LedgerStore;
