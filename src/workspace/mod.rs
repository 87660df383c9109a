//! Run workspaces
//!
//! Every pipeline execution owns one directory under the configured output
//! directory, named by a sortable timestamp. It holds the run's store, the
//! per-unit record files and the merged result. Workspaces are never deleted
//! or rewritten by the harvester.

use crate::storage::SqliteStorage;
use crate::{HarvestError, Result};
use chrono::Local;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const STORE_FILE: &str = "harvest.db";
const UNITS_DIR: &str = "units";
const LISTING_UNITS_DIR: &str = "listings";
const ITEM_UNITS_DIR: &str = "items";
const MERGED_LISTINGS_FILE: &str = "listings.json";
const MERGED_ITEMS_FILE: &str = "items.json";

/// Identifier of a run: its workspace directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    /// Builds an identifier from the current local time
    pub fn now() -> Self {
        Self(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
    }

    /// Accepts an existing identifier given by the operator
    ///
    /// Identifiers are plain directory names; separators and parent
    /// references are rejected.
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(HarvestError::Workspace(format!("Invalid run id '{}'", id)));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The on-disk workspace of one run
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    id: RunId,
    root: PathBuf,
}

impl RunWorkspace {
    /// Creates a fresh workspace under `base` and initializes its store
    ///
    /// Two runs started within the same second get distinct directories.
    pub fn create(base: &Path, busy_timeout: Duration) -> Result<Self> {
        fs::create_dir_all(base)?;

        let stamp = RunId::now();
        let mut id = stamp.clone();
        let mut suffix = 1;
        while base.join(id.as_str()).exists() {
            suffix += 1;
            id = RunId(format!("{}_{}", stamp, suffix));
        }

        let workspace = Self {
            root: base.join(id.as_str()),
            id,
        };

        fs::create_dir_all(workspace.listing_units_dir())?;
        fs::create_dir_all(workspace.item_units_dir())?;
        SqliteStorage::open(&workspace.store_path(), busy_timeout)?;

        info!(run = %workspace.id, path = %workspace.root.display(), "Created run workspace");
        Ok(workspace)
    }

    /// Opens the workspace of an earlier run
    ///
    /// Fails if the directory or its store does not exist; standalone stages
    /// never create a run implicitly.
    pub fn open(base: &Path, id: &RunId) -> Result<Self> {
        let workspace = Self {
            root: base.join(id.as_str()),
            id: id.clone(),
        };

        if !workspace.root.is_dir() {
            return Err(HarvestError::Workspace(format!(
                "Run '{}' not found under {}",
                id,
                base.display()
            )));
        }
        if !workspace.store_path().is_file() {
            return Err(HarvestError::Workspace(format!(
                "Run '{}' has no store at {}",
                id,
                workspace.store_path().display()
            )));
        }

        fs::create_dir_all(workspace.listing_units_dir())?;
        fs::create_dir_all(workspace.item_units_dir())?;

        Ok(workspace)
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn listing_units_dir(&self) -> PathBuf {
        self.root.join(UNITS_DIR).join(LISTING_UNITS_DIR)
    }

    pub fn item_units_dir(&self) -> PathBuf {
        self.root.join(UNITS_DIR).join(ITEM_UNITS_DIR)
    }

    pub fn merged_listings_path(&self) -> PathBuf {
        self.root.join(MERGED_LISTINGS_FILE)
    }

    pub fn merged_items_path(&self) -> PathBuf {
        self.root.join(MERGED_ITEMS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_lays_out_workspace() {
        let base = TempDir::new().unwrap();
        let ws = RunWorkspace::create(base.path(), Duration::from_secs(1)).unwrap();

        assert!(ws.root().starts_with(base.path()));
        assert!(ws.store_path().is_file());
        assert!(ws.listing_units_dir().is_dir());
        assert!(ws.item_units_dir().is_dir());
    }

    #[test]
    fn test_runs_in_same_second_do_not_collide() {
        let base = TempDir::new().unwrap();
        let first = RunWorkspace::create(base.path(), Duration::from_secs(1)).unwrap();
        let second = RunWorkspace::create(base.path(), Duration::from_secs(1)).unwrap();

        assert_ne!(first.id(), second.id());
        assert_ne!(first.root(), second.root());
    }

    #[test]
    fn test_open_existing_run() {
        let base = TempDir::new().unwrap();
        let created = RunWorkspace::create(base.path(), Duration::from_secs(1)).unwrap();

        let opened = RunWorkspace::open(base.path(), created.id()).unwrap();
        assert_eq!(opened.root(), created.root());
    }

    #[test]
    fn test_open_missing_run_fails() {
        let base = TempDir::new().unwrap();
        let id = RunId::parse("2024-01-01_00-00-00").unwrap();

        let result = RunWorkspace::open(base.path(), &id);
        assert!(matches!(result, Err(HarvestError::Workspace(_))));
    }

    #[test]
    fn test_open_run_without_store_fails() {
        let base = TempDir::new().unwrap();
        fs::create_dir_all(base.path().join("2024-01-01_00-00-00")).unwrap();
        let id = RunId::parse("2024-01-01_00-00-00").unwrap();

        assert!(RunWorkspace::open(base.path(), &id).is_err());
    }

    #[test]
    fn test_run_id_rejects_paths() {
        assert!(RunId::parse("../etc").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("2024-01-01_00-00-00").is_ok());
    }

    #[test]
    fn test_run_ids_sort_chronologically() {
        let earlier = RunId::parse("2024-01-01_09-00-00").unwrap();
        let later = RunId::parse("2024-01-01_10-00-00").unwrap();
        assert!(earlier < later);
    }
}
