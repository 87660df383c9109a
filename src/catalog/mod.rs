//! Catalog entities harvested by each stage
//!
//! - `Category`: top-level entry (e.g. a brand), produced by Stage 1
//! - `Subcategory`: child of a category (e.g. a model), produced by Stage 2
//! - `ListingRef`: a listing summary found on a subcategory page, Stage 3
//! - `ItemDetail`: the full item page, Stage 4
//!
//! Every entity carries a natural key through [`Keyed`]; the store and the
//! merge step both deduplicate on it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Natural unique key of a catalog entity
pub trait Keyed {
    fn dedup_key(&self) -> String;
}

/// Top-level category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Display name, unique within a run
    pub name: String,

    /// Absolute URL of the category page
    pub url: String,

    /// Advisory item count reported by the source
    pub item_count: u64,
}

/// Subcategory belonging to a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub category_name: String,
    pub name: String,
    pub url: String,
    pub item_count: u64,
}

/// Listing summary discovered on a subcategory page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRef {
    pub category_name: String,
    pub subcategory_name: String,
    pub title: String,

    /// Absolute URL of the item page, unique within a run
    pub url: String,

    pub price: Option<String>,
    pub image_url: Option<String>,
}

/// One row of an item's price history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub date: String,
    pub change: String,
    pub price: String,
}

/// Full item page
///
/// `images`, `attributes`, `specs`, `extras` and `price_history` belong to
/// this record alone and are removed with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetail {
    /// Source identifier, digits only
    pub item_id: String,

    /// Item page URL, unique within a run
    pub link: String,

    pub category_name: String,
    pub subcategory_name: String,
    pub title: String,
    pub subtitle: String,
    pub location: String,
    pub current_price: String,
    pub price_history: Vec<PriceChange>,
    pub images: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub specs: BTreeMap<String, String>,
    pub extras: BTreeSet<String>,
    pub description: String,
}

impl Keyed for Category {
    fn dedup_key(&self) -> String {
        self.name.clone()
    }
}

impl Keyed for Subcategory {
    fn dedup_key(&self) -> String {
        format!("{}\u{1f}{}", self.category_name, self.name)
    }
}

impl Keyed for ListingRef {
    fn dedup_key(&self) -> String {
        self.url.clone()
    }
}

impl Keyed for ItemDetail {
    fn dedup_key(&self) -> String {
        self.item_id.clone()
    }
}

/// Returns true if `id` is a non-empty string of ASCII digits
pub fn is_valid_item_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}
