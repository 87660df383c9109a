//! Per-unit record files
//!
//! Listing and item units each write the records they gathered to a file of
//! their own, so no two workers ever write the same path. Files are written to
//! a temporary name and renamed into place; a reader never sees half a file.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const MAX_SLUG_STEM: usize = 48;

/// File-system-safe, collision-resistant name for a unit label
///
/// The readable stem is lossy; the hash suffix keeps labels that sanitize to
/// the same stem apart.
pub fn unit_slug(label: &str) -> String {
    let mut stem = String::new();
    let mut last_dash = true;

    for c in label.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            stem.push(c);
            last_dash = false;
        } else if !last_dash {
            stem.push('-');
            last_dash = true;
        }
        if stem.chars().count() >= MAX_SLUG_STEM {
            break;
        }
    }

    let stem = stem.trim_matches('-');
    let digest = hex::encode(Sha256::digest(label.as_bytes()));
    let short = &digest[..8];

    if stem.is_empty() {
        format!("unit-{}", short)
    } else {
        format!("{}-{}", stem, short)
    }
}

/// Path of a unit's record file inside `dir`
pub fn unit_file_path(dir: &Path, slug: &str) -> PathBuf {
    dir.join(format!("{}.json", slug))
}

/// Atomically writes `records` as a JSON array
pub async fn write_unit_file<T: Serialize>(dir: &Path, slug: &str, records: &[T]) -> Result<PathBuf> {
    let path = unit_file_path(dir, slug);
    let tmp = dir.join(format!(".{}.json.tmp", slug));

    let json = serde_json::to_vec_pretty(records)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;

    Ok(path)
}

/// Reads a unit file back
pub fn read_unit_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
