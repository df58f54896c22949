//! # tally-db: SQLite Ledger Store for Tally
//!
//! Transactional persistence for drawer sessions, movements, the sales feed
//! and financial alerts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Data Flow                                │
//! │                                                                         │
//! │  tally-engine (through the LedgerStore trait)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ Session        │   │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ Movement, Sale │   │ 001_drawer_  │  │   │
//! │  │   │               │    │ Alert          │   │   ledger.sql │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) - drawer ownership enforced by a UNIQUE index            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//! let session = db.sessions().open("s-1", "drawer-1", "cashier-1", opening).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::alert::AlertRepository;
pub use repository::movement::MovementRepository;
pub use repository::sale::SaleRepository;
pub use repository::session::{opening_movement_id, SessionRepository};
