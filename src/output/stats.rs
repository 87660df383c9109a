//! Statistics generation from a run's store
//!
//! This module provides functionality for extracting and displaying
//! per-entity row counts of a run.

use crate::storage::{EntityKind, SqliteStorage};
use crate::workspace::RunWorkspace;
use crate::Result;
use std::collections::HashMap;

/// Run statistics summary
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// Run identifier
    pub run_id: String,

    /// Rows per top-level entity
    pub entities: HashMap<EntityKind, u64>,

    /// Rows per table, child collections included, parents first
    pub tables: Vec<(&'static str, u64)>,
}

impl RunStatistics {
    pub fn count(&self, kind: EntityKind) -> u64 {
        self.entities.get(&kind).copied().unwrap_or(0)
    }
}

/// Loads statistics from the store of `workspace`
pub fn load_statistics(workspace: &RunWorkspace, storage: &SqliteStorage) -> Result<RunStatistics> {
    let mut entities = HashMap::new();
    for kind in EntityKind::all() {
        entities.insert(kind, storage.count(kind)?);
    }

    Ok(RunStatistics {
        run_id: workspace.id().to_string(),
        entities,
        tables: storage.table_counts()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Run Statistics: {} ===\n", stats.run_id);

    println!("Entities:");
    for kind in EntityKind::all() {
        println!("  {}: {}", kind, stats.count(kind));
    }
    println!();

    println!("Tables:");
    for (table, count) in &stats.tables {
        println!("  {:<20} {}", table, count);
    }
    println!();

    // Share of discovered listings that have been fetched in full
    let listings = stats.count(EntityKind::Listing);
    let items = stats.count(EntityKind::ItemDetail);
    let coverage = if listings > 0 {
        (items as f64 / listings as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Item Coverage: {:.1}% ({} / {} listings fetched in detail)",
        coverage, items, listings
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, Subcategory};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_statistics_counts_entities() {
        let base = TempDir::new().unwrap();
        let workspace = RunWorkspace::create(base.path(), Duration::from_secs(1)).unwrap();
        let mut storage = SqliteStorage::open(&workspace.store_path(), Duration::from_secs(1)).unwrap();

        storage
            .insert_batch(&[Category {
                name: "BMW".to_string(),
                url: "https://example.com/bmw".to_string(),
                item_count: 120,
            }])
            .unwrap();
        storage
            .insert_batch(&[
                Subcategory {
                    category_name: "BMW".to_string(),
                    name: "X5".to_string(),
                    url: "https://example.com/bmw/x5".to_string(),
                    item_count: 30,
                },
                Subcategory {
                    category_name: "BMW".to_string(),
                    name: "M3".to_string(),
                    url: "https://example.com/bmw/m3".to_string(),
                    item_count: 12,
                },
            ])
            .unwrap();

        let stats = load_statistics(&workspace, &storage).unwrap();

        assert_eq!(stats.run_id, workspace.id().to_string());
        assert_eq!(stats.count(EntityKind::Category), 1);
        assert_eq!(stats.count(EntityKind::Subcategory), 2);
        assert_eq!(stats.count(EntityKind::ItemDetail), 0);
        assert_eq!(stats.tables.len(), 9);
    }
}
