//! Consolidation of the final stage's unit files
//!
//! Merge reads the record file of every unit dispatched in the final stage,
//! then fills in the store's records of the same kind that no unit file
//! carried (entities harvested by an earlier pass of the run), and writes one
//! deduplicated collection. A missing or unreadable unit file is reported and
//! skipped.

use crate::catalog::Keyed;
use crate::output::unit_file::{read_unit_file, unit_file_path};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Counts of a merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub files_read: usize,
    pub files_missing: usize,
    pub files_unreadable: usize,
    pub records: usize,
    pub duplicates: usize,
    /// Records taken from the store rather than a unit file
    pub from_store: usize,
}

/// Merges the unit files named by `slugs` from `dir`, then `stored`, into `output`
///
/// Records are deduplicated by natural key; the first occurrence wins and
/// slug order is preserved.
pub fn merge_unit_files<T>(
    dir: &Path,
    slugs: &[String],
    stored: Vec<T>,
    output: &Path,
) -> Result<MergeSummary>
where
    T: Keyed + Serialize + DeserializeOwned,
{
    let mut summary = MergeSummary::default();
    let mut seen = HashSet::new();
    let mut merged: Vec<T> = Vec::new();

    for slug in slugs {
        let path = unit_file_path(dir, slug);
        if !path.is_file() {
            warn!(unit = %slug, "Unit file missing, skipped in merge");
            summary.files_missing += 1;
            continue;
        }

        let records: Vec<T> = match read_unit_file(&path) {
            Ok(records) => records,
            Err(err) => {
                warn!(unit = %slug, error = %err, "Unit file unreadable, skipped in merge");
                summary.files_unreadable += 1;
                continue;
            }
        };

        summary.files_read += 1;
        for record in records {
            if seen.insert(record.dedup_key()) {
                merged.push(record);
            } else {
                summary.duplicates += 1;
            }
        }
    }

    for record in stored {
        if seen.insert(record.dedup_key()) {
            merged.push(record);
            summary.from_store += 1;
        }
    }

    summary.records = merged.len();

    let tmp = output.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(&merged)?)?;
    fs::rename(&tmp, output)?;

    info!(
        output = %output.display(),
        records = summary.records,
        files = summary.files_read,
        missing = summary.files_missing,
        unreadable = summary.files_unreadable,
        from_store = summary.from_store,
        "Merged unit files"
    );

    Ok(summary)
}
