use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ledger::{self, LedgerEntry};
use super::source::MigrationSource;
use super::unit::Migration;
use crate::errors::MigrateError;

/// Outcome of a `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Ids applied during this run, in apply order.
    pub applied: Vec<String>,
    /// Units that were already in the ledger and re-run under `force`.
    pub replayed: Vec<String>,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// A discovered unit paired with its ledger row, if any.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub id: String,
    pub name: String,
    pub path: Option<std::path::PathBuf>,
    pub applied: Option<LedgerEntry>,
}

/// Ledger view of every known unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    /// Ledger rows whose unit is no longer discovered.
    pub orphaned: Vec<LedgerEntry>,
}

/// Applies migration units against an exclusively owned SQLite connection.
pub struct Migrator<S: MigrationSource> {
    conn: Connection,
    source: S,
}

impl<S: MigrationSource> Migrator<S> {
    pub fn new(conn: Connection, source: S) -> Self {
        Self { conn, source }
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path, source: S) -> Result<Self, MigrateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| MigrateError::Discovery {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::new(conn, source))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// All discovered units in ascending id order.
    pub fn list_migrations(&self) -> Result<Vec<Arc<dyn Migration>>, MigrateError> {
        let mut units = self.source.discover()?;
        units.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(units)
    }

    pub fn list_applied(&self) -> Result<std::collections::BTreeSet<String>, MigrateError> {
        Ok(ledger::applied_ids(&self.conn)?)
    }

    /// Discovered units absent from the ledger, in ascending id order.
    pub fn pending(&self) -> Result<Vec<Arc<dyn Migration>>, MigrateError> {
        let applied = self.list_applied()?;
        Ok(self
            .list_migrations()?
            .into_iter()
            .filter(|m| !applied.contains(m.id()))
            .collect())
    }

    /// Run one unit's forward operation and record it, atomically.
    ///
    /// Returns whether a new ledger row was written; `false` only happens with
    /// `upsert` when the unit was already recorded.
    pub fn apply(&mut self, unit: &dyn Migration, upsert: bool) -> Result<bool, MigrateError> {
        let id = unit.id().to_string();
        debug!(id = %id, "applying migration");

        let tx = self.conn.transaction()?;
        unit.up(&tx).map_err(|source| MigrateError::Apply {
            id: id.clone(),
            source,
        })?;
        let inserted = ledger::record(&tx, &id, unit.name(), upsert)?;
        tx.commit()?;

        info!(id = %id, "migration applied");
        Ok(inserted)
    }

    /// Apply pending units (or every unit with `force`) in ascending id order.
    ///
    /// Stops at the first failing unit; units committed before it stay
    /// committed.
    ///
    /// `force` replays forward operations of units that are already in the
    /// ledger. That is only safe when those operations are idempotent, so
    /// callers should treat it as destructive.
    pub fn run(&mut self, force: bool) -> Result<RunReport, MigrateError> {
        ledger::ensure_table(&self.conn)?;
        let applied_before = self.list_applied()?;
        let batch = if force {
            warn!("force mode: replaying every migration regardless of ledger state");
            self.list_migrations()?
        } else {
            self.pending()?
        };

        let mut report = RunReport::default();
        for unit in batch {
            self.apply(unit.as_ref(), force)?;
            if applied_before.contains(unit.id()) {
                report.replayed.push(unit.id().to_string());
            }
            report.applied.push(unit.id().to_string());
        }
        Ok(report)
    }

    pub fn status(&self) -> Result<StatusReport, MigrateError> {
        let mut recorded: std::collections::BTreeMap<String, LedgerEntry> =
            ledger::entries(&self.conn)?
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect();

        let units = self
            .list_migrations()?
            .into_iter()
            .map(|m| UnitStatus {
                id: m.id().to_string(),
                name: m.name().to_string(),
                path: m.path().map(Path::to_path_buf),
                applied: recorded.remove(m.id()),
            })
            .collect();

        Ok(StatusReport {
            units,
            orphaned: recorded.into_values().collect(),
        })
    }
}
