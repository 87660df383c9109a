//! Shared asynchronous access to a run's store
//!
//! Workers never share a connection. Each write attempt opens its own
//! connection on the blocking pool, and SQLite's write lock serializes
//! concurrent batches.

use crate::config::StorageConfig;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::{BatchReport, Persist, StorageError, StorageResult};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Write retry policy
#[derive(Debug, Clone)]
pub struct WriteSettings {
    pub busy_timeout: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub retry_jitter: Duration,
}

impl From<&StorageConfig> for WriteSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            attempts: config.insert_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }
}

/// Result of handing a batch to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Committed; duplicates were ignored
    Stored(BatchReport),

    /// Given up on after repeated failures; the batch is lost
    Dropped { attempts: u32, error: String },
}

impl BatchOutcome {
    pub fn inserted(&self) -> usize {
        match self {
            Self::Stored(report) => report.inserted,
            Self::Dropped { .. } => 0,
        }
    }
}

/// Cloneable handle onto the store file of a run
#[derive(Debug, Clone)]
pub struct StoreHandle {
    path: PathBuf,
    settings: WriteSettings,
}

impl StoreHandle {
    pub fn new(path: impl Into<PathBuf>, settings: WriteSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts `records` as one transaction with insert-if-absent semantics
    ///
    /// Lock contention is retried up to the configured number of attempts
    /// with a jittered pause between tries. A batch that still cannot be
    /// written is logged and dropped; this never fails the caller.
    pub async fn insert_batch<T: Persist>(&self, records: Vec<T>) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::Stored(BatchReport::default());
        }

        let records = Arc::new(records);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let path = self.path.clone();
            let busy_timeout = self.settings.busy_timeout;
            let batch = Arc::clone(&records);

            let result = tokio::task::spawn_blocking(move || {
                let mut storage = SqliteStorage::connect(&path, busy_timeout)?;
                storage.insert_batch(batch.as_slice())
            })
            .await;

            let err = match result {
                Ok(Ok(report)) => {
                    debug!(
                        kind = %T::KIND,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        "Batch stored"
                    );
                    return BatchOutcome::Stored(report);
                }
                Ok(Err(err)) => err,
                Err(join_err) => StorageError::Database(join_err.to_string()),
            };

            if !err.is_contention() || attempt >= self.settings.attempts {
                warn!(
                    kind = %T::KIND,
                    records = records.len(),
                    attempts = attempt,
                    error = %err,
                    "Dropping batch after failed write"
                );
                return BatchOutcome::Dropped {
                    attempts: attempt,
                    error: err.to_string(),
                };
            }

            debug!(kind = %T::KIND, attempt, error = %err, "Store busy, retrying batch");
            tokio::time::sleep(self.retry_pause()).await;
        }
    }

    /// Runs a read against the store on the blocking pool
    pub async fn read<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&SqliteStorage) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.settings.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let storage = SqliteStorage::connect(&path, busy_timeout)?;
            f(&storage)
        })
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = self.settings.retry_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.settings.retry_delay + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use crate::storage::EntityKind;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn settings(attempts: u32) -> WriteSettings {
        WriteSettings {
            busy_timeout: Duration::from_millis(50),
            attempts,
            retry_delay: Duration::from_millis(10),
            retry_jitter: Duration::ZERO,
        }
    }

    fn store(dir: &TempDir, attempts: u32) -> StoreHandle {
        let path = dir.path().join("harvest.db");
        SqliteStorage::open(&path, Duration::from_secs(1)).unwrap();
        StoreHandle::new(path, settings(attempts))
    }

    fn category(name: &str) -> Category {
        Category {
            name: name.to_string(),
            url: format!("https://example.com/{}", name),
            item_count: 1,
        }
    }

    #[tokio::test]
    async fn test_concurrent_batches_all_land() {
        let dir = TempDir::new().unwrap();
        let handle = StoreHandle::new(
            dir.path().join("harvest.db"),
            WriteSettings {
                busy_timeout: Duration::from_secs(5),
                ..settings(5)
            },
        );
        SqliteStorage::open(handle.path(), Duration::from_secs(1)).unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .insert_batch(vec![category(&format!("c{}", i)), category("shared")])
                    .await
            }));
        }

        let mut inserted = 0;
        for task in tasks {
            inserted += task.await.unwrap().inserted();
        }

        assert_eq!(inserted, 9);
        let count = handle
            .read(|s| s.count(EntityKind::Category))
            .await
            .unwrap();
        assert_eq!(count, 9);
    }

    #[tokio::test]
    async fn test_locked_store_drops_batch_after_attempts() {
        let dir = TempDir::new().unwrap();
        let handle = store(&dir, 2);

        let locker = Connection::open(handle.path()).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let outcome = handle.insert_batch(vec![category("BMW")]).await;
        match outcome {
            BatchOutcome::Dropped { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected a dropped batch, got {:?}", other),
        }

        locker.execute_batch("ROLLBACK;").unwrap();

        let outcome = handle.insert_batch(vec![category("BMW")]).await;
        assert_eq!(outcome.inserted(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let handle = store(&dir, 1);

        let outcome = handle.insert_batch(Vec::<Category>::new()).await;
        assert_eq!(outcome, BatchOutcome::Stored(BatchReport::default()));
    }

    #[test]
    fn test_retry_pause_stays_within_jitter() {
        let handle = StoreHandle::new(
            "unused.db",
            WriteSettings {
                busy_timeout: Duration::from_millis(1),
                attempts: 5,
                retry_delay: Duration::from_millis(500),
                retry_jitter: Duration::from_millis(500),
            },
        );

        for _ in 0..50 {
            let pause = handle.retry_pause();
            assert!(pause >= Duration::from_millis(500));
            assert!(pause <= Duration::from_millis(1000));
        }
    }
}
