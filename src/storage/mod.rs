//! Storage module for persisting harvested entities
//!
//! This module handles all database operations for a run, including:
//! - SQLite database initialization and schema management
//! - Insert-if-absent persistence keyed on each entity's natural key
//! - Retrying batch writes shared by concurrent workers
//! - Reads for merge, statistics and stage inputs

mod schema;
mod sqlite;
mod traits;
mod writer;

pub use sqlite::SqliteStorage;
pub use traits::{BatchReport, EntityKind, Persist, StorageError, StorageResult};
pub use writer::{BatchOutcome, StoreHandle, WriteSettings};

use crate::HarvestError;
use std::path::Path;
use std::time::Duration;

/// Initializes or opens a run's store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `busy_timeout` - How long writers wait on the write lock
pub fn open_storage(path: &Path, busy_timeout: Duration) -> Result<SqliteStorage, HarvestError> {
    Ok(SqliteStorage::open(path, busy_timeout)?)
}
