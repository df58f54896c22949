//! # Repository Module
//!
//! Ledger Store repository implementations.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  tally-engine (LedgerStore impl for Database)                          │
//! │       │                                                                 │
//! │       │  db.sessions().begin_close("s-1", "op-1", counted)             │
//! │       ▼                                                                 │
//! │  SessionRepository    MovementRepository   SaleRepository              │
//! │  ├── open             ├── append           ├── record_sale             │
//! │  ├── begin_close      ├── list_for_session ├── totals_by_method        │
//! │  ├── finalize_close   └── cash_from_sales  └── raw_total               │
//! │  └── annotate                                                           │
//! │                        AlertRepository                                  │
//! │                        ├── append (fingerprint dedupe)                  │
//! │                        └── list_for_date / list_for_session             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each repository also exposes executor-generic helpers to its siblings so
//! the close transaction can write movements and alerts on one connection.

pub mod alert;
pub mod movement;
pub mod sale;
pub mod session;
