//! Storage traits and error types
//!
//! This module defines how entities are written into the store and the error
//! types surfaced by storage operations.

use rusqlite::{ErrorCode, Transaction};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true for write contention that a later attempt may clear
    pub fn is_contention(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Kind of entity held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    Subcategory,
    Listing,
    ItemDetail,
}

impl EntityKind {
    /// Table holding rows of this kind
    pub fn table(&self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Subcategory => "subcategories",
            Self::Listing => "listings",
            Self::ItemDetail => "item_details",
        }
    }

    pub fn all() -> [EntityKind; 4] {
        [
            Self::Category,
            Self::Subcategory,
            Self::Listing,
            Self::ItemDetail,
        ]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// An entity that can be inserted into the store with insert-if-absent semantics
pub trait Persist: Send + Sync + 'static {
    const KIND: EntityKind;

    /// Inserts the record inside `tx`
    ///
    /// Returns `Ok(false)` when the natural key is already present; that case
    /// is a no-op, never an error.
    fn insert(&self, tx: &Transaction<'_>) -> rusqlite::Result<bool>;
}

/// Counts of a committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub duplicates: usize,
}
