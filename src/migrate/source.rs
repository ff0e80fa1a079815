//! Where migration units come from.
//!
//! `DirectorySource` maps `*.sql` files under a directory to `SqlMigration`
//! units. `Registry` holds units defined in code. Both hand the engine an
//! unsorted list; ordering is the engine's job.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::unit::{
    Migration, SqlMigration, allocate_token, format_token, slugify, split_id, template,
    token_floor,
};
use crate::errors::MigrateError;

/// A provider of migration units.
pub trait MigrationSource: Send + Sync {
    fn discover(&self) -> Result<Vec<Arc<dyn Migration>>, MigrateError>;
}

/// Recursively scans a directory for `<token>_<name>.sql` files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<(), MigrateError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| MigrateError::Discovery {
            path: self.dir.clone(),
            source,
        })
    }

    /// The id that currently applies last.
    fn newest_id(&self) -> Result<Option<String>, MigrateError> {
        Ok(self.discover()?.iter().map(|m| m.id().to_string()).max())
    }

    /// Write a new, empty migration file and return its path.
    pub fn create(&self, name: &str) -> Result<PathBuf, MigrateError> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrateError::InvalidName(name.to_string()));
        }
        self.ensure_dir()?;

        let newest = self.newest_id()?;
        let floor = match &newest {
            Some(id) => Some(
                split_id(id)
                    .and_then(|(token, _)| token_floor(token))
                    .ok_or_else(|| MigrateError::TokensExhausted(id.clone()))?,
            ),
            None => None,
        };
        let token = allocate_token(Utc::now(), floor)
            .ok_or_else(|| MigrateError::TokensExhausted(newest.unwrap_or_default()))?;
        let id = format!("{}_{}", format_token(token), slug);
        let path = self.dir.join(format!("{}.sql", id));

        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(template(&id, name).as_bytes())
            })
            .map_err(|source| MigrateError::CreateFailed {
                path: path.clone(),
                source,
            })?;

        debug!(id = %id, path = %path.display(), "created migration");
        Ok(path)
    }
}

impl MigrationSource for DirectorySource {
    fn discover(&self) -> Result<Vec<Arc<dyn Migration>>, MigrateError> {
        if !self.dir.exists() {
            self.ensure_dir()?;
            return Ok(Vec::new());
        }

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut units: Vec<Arc<dyn Migration>> = Vec::new();

        for entry in WalkDir::new(&self.dir).follow_links(true) {
            let entry = entry.map_err(|e| MigrateError::Discovery {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| self.dir.clone()),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("sql")
            {
                continue;
            }

            let Some(unit) = SqlMigration::from_path(path) else {
                warn!(path = %path.display(), "skipping file without a <timestamp>_<name> id");
                continue;
            };

            if let Some(first) = seen.get(unit.id()) {
                return Err(MigrateError::DuplicateId {
                    id: unit.id().to_string(),
                    first: first.clone(),
                    second: path.to_path_buf(),
                });
            }
            seen.insert(unit.id().to_string(), path.to_path_buf());
            units.push(Arc::new(unit));
        }

        Ok(units)
    }
}

/// Migration units registered in code, keyed by id.
#[derive(Default, Clone)]
pub struct Registry {
    units: Vec<Arc<dyn Migration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, unit: impl Migration + 'static) -> Self {
        self.units.push(Arc::new(unit));
        self
    }
}

impl MigrationSource for Registry {
    fn discover(&self) -> Result<Vec<Arc<dyn Migration>>, MigrateError> {
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id()) {
                return Err(MigrateError::DuplicateId {
                    id: unit.id().to_string(),
                    first: PathBuf::from("<registry>"),
                    second: PathBuf::from("<registry>"),
                });
            }
        }
        Ok(self.units.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_created_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db").join("migrations");
        let source = DirectorySource::new(&dir);

        let units = source.discover().unwrap();
        assert!(units.is_empty());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_discovery_is_recursive_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("2026");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join("20260101000000000_a.sql"), "").unwrap();
        std::fs::write(nested.join("20260102000000000_b.sql"), "").unwrap();
        std::fs::write(tmp.path().join("README.md"), "docs").unwrap();
        std::fs::write(tmp.path().join("seed.sql"), "").unwrap();

        let mut ids: Vec<String> = DirectorySource::new(tmp.path())
            .discover()
            .unwrap()
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["20260101000000000_a", "20260102000000000_b"]);
    }

    #[test]
    fn test_duplicate_ids_in_subdirectories_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join("20260101000000000_a.sql"), "").unwrap();
        std::fs::write(nested.join("20260101000000000_a.sql"), "").unwrap();

        let err = DirectorySource::new(tmp.path()).discover().err().unwrap();
        assert!(matches!(err, MigrateError::DuplicateId { .. }));
    }

    #[test]
    fn test_create_writes_template() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(tmp.path());

        let path = source.create("Add Nodes").unwrap();
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("_add_nodes.sql"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("-- migrate:up"));
        assert!(content.contains("-- migrate:down"));
    }

    #[test]
    fn test_create_after_future_dated_file_sorts_last() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("99990101000000000_future.sql"), "").unwrap();
        let source = DirectorySource::new(tmp.path());

        let path = source.create("later").unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();
        assert!(stem.as_str() > "99990101000000000_future");
    }

    #[test]
    fn test_create_after_short_token_sorts_last() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("2_seed.sql"), "").unwrap();
        let source = DirectorySource::new(tmp.path());

        let path = source.create("next").unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();

        let mut ids: Vec<String> = source
            .discover()
            .unwrap()
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["2_seed".to_string(), stem]);
    }

    #[test]
    fn test_create_after_oversized_token_sorts_last() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("18446744073709551615_big.sql"), "").unwrap();
        let source = DirectorySource::new(tmp.path());

        let path = source.create("next").unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert!(stem > "18446744073709551615_big");
    }

    #[test]
    fn test_create_fails_when_no_token_sorts_after() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("9_last.sql"), "").unwrap();

        let err = DirectorySource::new(tmp.path()).create("next").unwrap_err();
        assert!(matches!(err, MigrateError::TokensExhausted(ref id) if id == "9_last"));
    }

    #[test]
    fn test_create_rejects_empty_slug() {
        let tmp = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(tmp.path()).create("???").unwrap_err();
        assert!(matches!(err, MigrateError::InvalidName(_)));
    }
}
