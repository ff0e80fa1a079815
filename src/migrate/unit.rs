//! Migration units: the `Migration` capability trait, the SQL file-backed
//! implementation, and id allocation for new units.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Transaction;

/// Marker that opens the forward section of a migration file.
pub const UP_MARKER: &str = "-- migrate:up";
/// Marker that opens the rollback section of a migration file.
pub const DOWN_MARKER: &str = "-- migrate:down";

/// Width of the timestamp token at the front of every id (`YYYYMMDDHHMMSSmmm`).
pub const TOKEN_WIDTH: usize = 17;

/// A single, ordered schema change.
///
/// Units are applied in ascending `id` order. `up` runs inside the same
/// transaction that records the unit in the ledger.
pub trait Migration: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Filesystem location of the unit, if it is file-backed.
    fn path(&self) -> Option<&Path> {
        None
    }

    fn up(&self, tx: &Transaction<'_>) -> Result<()>;

    fn down(&self, _tx: &Transaction<'_>) -> Result<()> {
        anyhow::bail!("Migration {} has no down operation", self.id())
    }
}

/// A migration whose forward and rollback SQL live in one `.sql` file.
///
/// The file is only read when `up` or `down` runs, so discovery stays cheap
/// for large migration directories.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    id: String,
    name: String,
    path: PathBuf,
}

impl SqlMigration {
    pub fn new(id: String, name: String, path: PathBuf) -> Self {
        Self { id, name, path }
    }

    /// Build a unit from a file path, or `None` if the file stem is not a
    /// valid migration id.
    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        let (_, name) = split_id(stem)?;
        Some(Self::new(stem.to_string(), name.to_string(), path.to_path_buf()))
    }

    fn read(&self) -> Result<SqlSections> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read migration file {}", self.path.display()))?;
        Ok(SqlSections::parse(&content))
    }
}

impl Migration for SqlMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn up(&self, tx: &Transaction<'_>) -> Result<()> {
        let sections = self.read()?;
        if sections.up.trim().is_empty() {
            return Ok(());
        }
        tx.execute_batch(&sections.up).context("Forward SQL failed")
    }

    fn down(&self, tx: &Transaction<'_>) -> Result<()> {
        let sections = self.read()?;
        match sections.down {
            Some(sql) if !sql.trim().is_empty() => {
                tx.execute_batch(&sql).context("Rollback SQL failed")
            }
            _ => anyhow::bail!("Migration {} has no down section", self.id),
        }
    }
}

/// The forward and rollback sections of a migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlSections {
    pub up: String,
    pub down: Option<String>,
}

impl SqlSections {
    /// Split file content on the `-- migrate:up` / `-- migrate:down` markers.
    ///
    /// Content before the first marker is ignored. A file without an up
    /// marker is treated as forward SQL in its entirety.
    pub fn parse(content: &str) -> Self {
        let has_markers = content
            .lines()
            .any(|l| l.trim() == UP_MARKER || l.trim() == DOWN_MARKER);
        if !has_markers {
            return Self {
                up: content.to_string(),
                down: None,
            };
        }

        #[derive(PartialEq)]
        enum Section {
            Preamble,
            Up,
            Down,
        }

        let mut section = Section::Preamble;
        let mut up = String::new();
        let mut down: Option<String> = None;
        for line in content.lines() {
            match line.trim() {
                UP_MARKER => section = Section::Up,
                DOWN_MARKER => {
                    section = Section::Down;
                    down.get_or_insert_with(String::new);
                }
                _ => match section {
                    Section::Preamble => {}
                    Section::Up => {
                        up.push_str(line);
                        up.push('\n');
                    }
                    Section::Down => {
                        if let Some(d) = down.as_mut() {
                            d.push_str(line);
                            d.push('\n');
                        }
                    }
                },
            }
        }
        Self { up, down }
    }
}

/// Split an id into its timestamp token and name.
///
/// Returns `None` unless the id is `<digits>_<name>` with a non-empty name.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let (token, name) = id.split_once('_')?;
    if token.is_empty() || name.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((token, name))
}

/// Lowercase a human label into `snake_case` for use in file names.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Format a UTC instant as a fixed-width `YYYYMMDDHHMMSSmmm` token.
pub fn timestamp_token(at: DateTime<Utc>) -> u64 {
    // 17 decimal digits fit comfortably in a u64.
    at.format("%Y%m%d%H%M%S%3f")
        .to_string()
        .parse()
        .unwrap_or_default()
}

/// Largest token that fits in [`TOKEN_WIDTH`] digits.
pub const MAX_TOKEN: u64 = 99_999_999_999_999_999;

/// Add one to a string of ASCII digits, growing it on carry.
fn increment_digits(digits: &str) -> String {
    let mut bytes = digits.as_bytes().to_vec();
    for b in bytes.iter_mut().rev() {
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            return bytes.iter().map(|&b| b as char).collect();
        }
    }
    std::iter::once('1')
        .chain(bytes.iter().map(|&b| b as char))
        .collect()
}

/// Smallest [`TOKEN_WIDTH`]-digit token whose ids sort after every id that
/// starts with `token`, whatever the names.
///
/// Ids are ordered as strings and `_` sorts above every digit, so a shorter
/// token like `2` is only beaten by `3000...`, while a longer one is beaten
/// by its own 17-digit prefix. Returns `None` when no such token fits.
pub fn token_floor(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let bound = if token.len() > TOKEN_WIDTH {
        token[..TOKEN_WIDTH].to_string()
    } else {
        let bumped = increment_digits(token);
        if bumped.len() > TOKEN_WIDTH {
            return None;
        }
        format!("{bumped:0<width$}", width = TOKEN_WIDTH)
    };
    bound.parse().ok()
}

static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Allocate a timestamp token for a new unit.
///
/// The token is at least `floor` (see [`token_floor`]) and strictly greater
/// than any token this process handed out before, so ids created inside the
/// same millisecond still sort in creation order. Returns `None` once the
/// token would no longer fit in [`TOKEN_WIDTH`] digits.
pub fn allocate_token(now: DateTime<Utc>, floor: Option<u64>) -> Option<u64> {
    let candidate = timestamp_token(now).max(floor.unwrap_or(0));
    let mut last = LAST_ISSUED.load(Ordering::SeqCst);
    loop {
        let next = candidate.max(last.saturating_add(1));
        if next > MAX_TOKEN {
            return None;
        }
        match LAST_ISSUED.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Some(next),
            Err(observed) => last = observed,
        }
    }
}

/// Format a token as the zero-padded prefix of an id.
pub fn format_token(token: u64) -> String {
    format!("{token:0width$}", width = TOKEN_WIDTH)
}

/// Render the body of a freshly created migration file.
pub fn template(id: &str, name: &str) -> String {
    format!(
        "-- Migration {id}: {name}\n\
         -- Statements under `{UP_MARKER}` run once, in id order.\n\
         -- Statements under `{DOWN_MARKER}` are kept for manual rollback.\n\
         \n\
         {UP_MARKER}\n\
         \n\
         \n\
         {DOWN_MARKER}\n\
         \n"
    )
}
