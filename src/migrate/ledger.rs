//! Durable record of applied migration units.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "_panel_migrations";

/// One applied migration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub name: String,
    pub executed_at: String,
}

/// Create the ledger table if it does not exist yet.
pub fn ensure_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            executed_at TEXT NOT NULL
        );"
    ))
}

/// Ids of every applied unit.
pub fn applied_ids(conn: &Connection) -> rusqlite::Result<BTreeSet<String>> {
    ensure_table(conn)?;
    let mut stmt = conn.prepare(&format!("SELECT id FROM {LEDGER_TABLE}"))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(ids)
}

/// Every ledger row, ordered by id.
pub fn entries(conn: &Connection) -> rusqlite::Result<Vec<LedgerEntry>> {
    ensure_table(conn)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, executed_at FROM {LEDGER_TABLE} ORDER BY id ASC"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LedgerEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                executed_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<LedgerEntry>> {
    ensure_table(conn)?;
    conn.query_row(
        &format!("SELECT id, name, executed_at FROM {LEDGER_TABLE} WHERE id = ?1"),
        params![id],
        |row| {
            Ok(LedgerEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                executed_at: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Insert the ledger row for `id`.
///
/// With `upsert`, an existing row is left untouched instead of raising a
/// primary key violation. Returns whether a new row was written.
pub fn record(conn: &Connection, id: &str, name: &str, upsert: bool) -> rusqlite::Result<bool> {
    let executed_at = Utc::now().to_rfc3339();
    let sql = if upsert {
        format!(
            "INSERT INTO {LEDGER_TABLE} (id, name, executed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING"
        )
    } else {
        format!("INSERT INTO {LEDGER_TABLE} (id, name, executed_at) VALUES (?1, ?2, ?3)")
    };
    let changed = conn.execute(&sql, params![id, name, executed_at])?;
    Ok(changed == 1)
}
