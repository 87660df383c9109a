//! Per-unit work for the pooled stages
//!
//! **Paging algorithm (subcategory and listing units):**
//! 1. Fetch the first page; failure fails the unit
//! 2. Read the declared page count (1 when unreadable or not paginating)
//! 3. Fetch pages 2..N; a page that fails to fetch or parse is logged and
//!    skipped, an empty page ends pagination early
//! 4. Store everything gathered, then write the unit file (listing and item
//!    units only)
//!
//! Item units fetch each listing of their batch independently and only fail
//! when not a single item could be fetched.

use crate::catalog::{Category, ListingRef, Subcategory};
use crate::crawler::fetcher::{FetchFailure, Fetcher};
use crate::crawler::parser::{CatalogParser, ParseError};
use crate::crawler::pool::WorkUnit;
use crate::output::{unit_slug, write_unit_file};
use crate::storage::{BatchOutcome, Persist, StoreHandle};
use crate::{HarvestError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl WorkUnit for Category {
    fn label(&self) -> String {
        self.name.clone()
    }
}

impl WorkUnit for Subcategory {
    fn label(&self) -> String {
        format!("{}/{}", self.category_name, self.name)
    }
}

/// A slice of one subcategory's listings, fetched in detail by one unit
#[derive(Debug, Clone)]
pub struct ItemBatch {
    pub category_name: String,
    pub subcategory_name: String,
    pub index: usize,
    pub listings: Vec<ListingRef>,
}

impl WorkUnit for ItemBatch {
    fn label(&self) -> String {
        format!(
            "{}/{}#{}",
            self.category_name, self.subcategory_name, self.index
        )
    }
}

/// Splits listings into per-subcategory batches of at most `batch_size`
///
/// Listings must arrive grouped by (category, subcategory).
pub fn item_batches(listings: Vec<ListingRef>, batch_size: usize) -> Vec<ItemBatch> {
    let batch_size = batch_size.max(1);
    let mut batches: Vec<ItemBatch> = Vec::new();

    for listing in listings {
        let fits = batches.last().is_some_and(|batch| {
            batch.category_name == listing.category_name
                && batch.subcategory_name == listing.subcategory_name
                && batch.listings.len() < batch_size
        });

        if fits {
            if let Some(batch) = batches.last_mut() {
                batch.listings.push(listing);
            }
            continue;
        }

        let index = match batches.last() {
            Some(prev)
                if prev.category_name == listing.category_name
                    && prev.subcategory_name == listing.subcategory_name =>
            {
                prev.index + 1
            }
            _ => 0,
        };

        batches.push(ItemBatch {
            category_name: listing.category_name.clone(),
            subcategory_name: listing.subcategory_name.clone(),
            index,
            listings: vec![listing],
        });
    }

    batches
}

/// Shared, read-only context of a stage's units
pub struct UnitContext<F, P> {
    pub fetcher: Arc<F>,
    pub parser: Arc<P>,
    pub store: StoreHandle,
    pub proxy: String,
    pub max_attempts: u32,
    pub paginate_categories: bool,
    pub listing_units_dir: PathBuf,
    pub item_units_dir: PathBuf,
}

impl<F: Fetcher, P: CatalogParser> UnitContext<F, P> {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchFailure> {
        self.fetcher.fetch(url, &self.proxy, self.max_attempts).await
    }

    /// Gathers the records of a paginated listing rooted at `url`
    async fn collect_pages<T, Parse>(&self, url: &str, paginate: bool, parse: Parse) -> Result<Vec<T>>
    where
        T: Send,
        Parse: Fn(&str) -> std::result::Result<Vec<T>, ParseError> + Send + Sync,
    {
        let first = self.fetch(url).await?;
        let mut records = parse(&first).map_err(|e| HarvestError::parse(url, e))?;

        let last_page = if paginate {
            self.parser.extract_last_page(&first)
        } else {
            1
        };
        debug!(url, last_page, "First page parsed");

        for page in 2..=last_page {
            let page_url = self.parser.page_url(url, page);

            let html = match self.fetch(&page_url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(url = %page_url, page, error = %err, "Page fetch failed, continuing");
                    continue;
                }
            };

            match parse(&html) {
                Ok(page_records) if page_records.is_empty() => {
                    debug!(url = %page_url, page, "Empty page, stopping pagination");
                    break;
                }
                Ok(page_records) => records.extend(page_records),
                Err(err) => {
                    warn!(url = %page_url, page, error = %err, "Page parse failed, continuing");
                }
            }
        }

        Ok(records)
    }
}

/// Stage 2: subcategories of one category
pub async fn harvest_subcategories<F, P>(ctx: &UnitContext<F, P>, category: Category) -> Result<usize>
where
    F: Fetcher,
    P: CatalogParser,
{
    let subcategories = ctx
        .collect_pages(&category.url, ctx.paginate_categories, |html| {
            ctx.parser.parse_subcategories(html, &category.name)
        })
        .await?;

    let gathered = subcategories.len();
    store(&ctx.store, subcategories).await;
    Ok(gathered)
}

/// Stage 3: listings of one subcategory
pub async fn harvest_listings<F, P>(ctx: &UnitContext<F, P>, subcategory: Subcategory) -> Result<usize>
where
    F: Fetcher,
    P: CatalogParser,
{
    let label = subcategory.label();
    let listings = ctx
        .collect_pages(&subcategory.url, true, |html| {
            ctx.parser
                .parse_listings(html, &subcategory.category_name, &subcategory.name)
        })
        .await?;

    let gathered = listings.len();
    persist_unit(ctx, &ctx.listing_units_dir, &label, listings).await;
    Ok(gathered)
}

/// Stage 4: item details of one batch of listings
pub async fn harvest_items<F, P>(ctx: &UnitContext<F, P>, batch: ItemBatch) -> Result<usize>
where
    F: Fetcher,
    P: CatalogParser,
{
    let label = batch.label();
    let mut items = Vec::with_capacity(batch.listings.len());
    let mut last_failure = None;
    let mut fetched = 0;

    for listing in &batch.listings {
        let html = match ctx.fetch(&listing.url).await {
            Ok(html) => html,
            Err(err) => {
                warn!(url = %listing.url, error = %err, "Item fetch failed, skipping");
                last_failure = Some(err);
                continue;
            }
        };
        fetched += 1;

        match ctx.parser.parse_item_detail(
            &html,
            &listing.url,
            &batch.category_name,
            &batch.subcategory_name,
        ) {
            Ok(item) => items.push(item),
            Err(err) => warn!(url = %listing.url, error = %err, "Item parse failed, skipping"),
        }
    }

    if fetched == 0 {
        if let Some(failure) = last_failure {
            return Err(failure.into());
        }
    }

    let gathered = items.len();
    persist_unit(ctx, &ctx.item_units_dir, &label, items).await;
    Ok(gathered)
}

/// Stores a unit's records, then writes its unit file
///
/// A unit file that cannot be written is only logged: the records are already
/// in the store, and the merge backfills from there.
async fn persist_unit<T, F, P>(ctx: &UnitContext<F, P>, dir: &Path, label: &str, records: Vec<T>)
where
    T: Persist + Serialize + Clone,
{
    store(&ctx.store, records.clone()).await;

    let slug = unit_slug(label);
    match write_unit_file(dir, &slug, &records).await {
        Ok(path) => debug!(path = %path.display(), records = records.len(), "Unit file written"),
        Err(err) => warn!(unit = label, error = %err, "Unit file not written, records kept in store"),
    }
}

pub(crate) async fn store<T: Persist>(store: &StoreHandle, records: Vec<T>) {
    let kind = T::KIND;
    match store.insert_batch(records).await {
        BatchOutcome::Stored(report) => info!(
            %kind,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "Records stored"
        ),
        BatchOutcome::Dropped { attempts, error } => warn!(
            %kind,
            attempts,
            error = %error,
            "Records dropped"
        ),
    }
}
