//! Migration engine: ordered, at-most-once schema changes with a durable
//! ledger.
//!
//! ## Overview
//!
//! ```text
//!  migrations/                 ┌─────────────────────────────┐
//!  ├── 2026...000_create.sql ─>│ DirectorySource::discover() │
//!  └── 2026...001_index.sql    └──────────────┬──────────────┘
//!                                             │ Vec<Arc<dyn Migration>>
//!                                             v
//!                              ┌─────────────────────────────┐
//!                              │ Migrator::run(force)        │
//!                              │   sort by id                │
//!                              │   minus ledger ids          │
//!                              │   for each: BEGIN           │
//!                              │       up(tx) + ledger row   │
//!                              │     COMMIT                  │
//!                              └─────────────────────────────┘
//! ```
//!
//! | Module   | Responsibility                                          |
//! |----------|---------------------------------------------------------|
//! | `unit`   | `Migration` trait, `SqlMigration`, id allocation        |
//! | `source` | `DirectorySource` (filesystem scan), `Registry` (code)  |
//! | `ledger` | `_panel_migrations` table access                        |
//! | `engine` | `Migrator`: list, pending, apply, run, status           |
//!
//! Apply order is the ascending string sort of ids. A failing unit aborts
//! the run; earlier units stay committed.

pub mod engine;
pub mod ledger;
pub mod source;
pub mod unit;

pub use engine::{Migrator, RunReport, StatusReport, UnitStatus};
pub use ledger::LedgerEntry;
pub use source::{DirectorySource, MigrationSource, Registry};
pub use unit::{Migration, SqlMigration};
