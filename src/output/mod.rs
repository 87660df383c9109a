//! Output module for unit record files, merge and run statistics
//!
//! This module handles:
//! - Writing each listing/item unit's records to its own JSON file
//! - Merging the final stage's unit files into one collection
//! - Reporting per-entity statistics of a run

mod merge;
pub mod stats;
mod unit_file;

pub use merge::{merge_unit_files, MergeSummary};
pub use stats::{load_statistics, print_statistics, RunStatistics};
pub use unit_file::{read_unit_file, unit_file_path, unit_slug, write_unit_file};
