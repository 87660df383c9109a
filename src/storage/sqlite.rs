//! SQLite storage implementation
//!
//! One database file per run. Every connection runs in WAL mode with a
//! bounded busy timeout, so concurrent writers serialize on SQLite's own write
//! lock and contention surfaces as `SQLITE_BUSY` rather than blocking forever.

use crate::catalog::{Category, ItemDetail, ListingRef, PriceChange, Subcategory};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{BatchReport, EntityKind, Persist, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Every table of the store, parents first
const ALL_TABLES: [&str; 9] = [
    "categories",
    "subcategories",
    "listings",
    "item_details",
    "item_price_history",
    "item_images",
    "item_attributes",
    "item_specs",
    "item_extras",
];

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (creating if needed) the store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long a writer waits on the write lock
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        let storage = Self::connect(path, busy_timeout)?;
        initialize_schema(&storage.conn)?;
        Ok(storage)
    }

    /// Connects to a store whose schema is already in place
    pub fn connect(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Inserts `records` in a single transaction, ignoring present keys
    ///
    /// The write lock is taken up front so contention is reported before any
    /// row is touched.
    pub fn insert_batch<T: Persist>(&mut self, records: &[T]) -> StorageResult<BatchReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut report = BatchReport::default();
        for record in records {
            if record.insert(&tx)? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        tx.commit()?;
        Ok(report)
    }

    // ===== Reads =====

    /// Loads all categories, largest first
    pub fn load_categories(&self) -> StorageResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, url, item_count FROM categories ORDER BY item_count DESC, name ASC",
        )?;

        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    item_count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Loads all subcategories in insertion order
    pub fn load_subcategories(&self) -> StorageResult<Vec<Subcategory>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_name, name, url, item_count FROM subcategories ORDER BY id ASC",
        )?;

        let subcategories = stmt
            .query_map([], |row| {
                Ok(Subcategory {
                    category_name: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    item_count: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subcategories)
    }

    /// Loads the subcategories of one category
    pub fn load_subcategories_of(&self, category_name: &str) -> StorageResult<Vec<Subcategory>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_name, name, url, item_count FROM subcategories
             WHERE category_name = ?1 ORDER BY id ASC",
        )?;

        let subcategories = stmt
            .query_map(params![category_name], |row| {
                Ok(Subcategory {
                    category_name: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    item_count: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subcategories)
    }

    /// Loads all listing references, grouped by parent
    pub fn load_listings(&self) -> StorageResult<Vec<ListingRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_name, subcategory_name, title, url, price, image_url
             FROM listings ORDER BY category_name, subcategory_name, rowid",
        )?;

        let listings = stmt
            .query_map([], listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(listings)
    }

    /// Loads the listings that have no stored item yet, grouped by parent
    pub fn load_pending_listings(&self) -> StorageResult<Vec<ListingRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_name, subcategory_name, title, url, price, image_url
             FROM listings
             WHERE url NOT IN (SELECT link FROM item_details)
             ORDER BY category_name, subcategory_name, rowid",
        )?;

        let listings = stmt
            .query_map([], listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(listings)
    }

    /// Loads one item with all of its child collections
    pub fn load_item_detail(&self, item_id: &str) -> StorageResult<Option<ItemDetail>> {
        let item = self
            .conn
            .query_row(
                "SELECT item_id, link, category_name, subcategory_name, title, subtitle,
                 location, current_price, description
                 FROM item_details WHERE item_id = ?1",
                params![item_id],
                item_from_row,
            )
            .optional()?;

        match item {
            Some(mut item) => {
                self.load_item_children(&mut item)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Loads every stored item with its child collections
    pub fn load_item_details(&self) -> StorageResult<Vec<ItemDetail>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, link, category_name, subcategory_name, title, subtitle,
             location, current_price, description
             FROM item_details ORDER BY rowid",
        )?;

        let mut items = stmt
            .query_map([], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for item in &mut items {
            self.load_item_children(item)?;
        }

        Ok(items)
    }

    fn load_item_children(&self, item: &mut ItemDetail) -> StorageResult<()> {
        let mut stmt = self.conn.prepare(
            "SELECT date, change, price FROM item_price_history
             WHERE item_id = ?1 ORDER BY position",
        )?;
        item.price_history = stmt
            .query_map(params![item.item_id], |row| {
                Ok(PriceChange {
                    date: row.get(0)?,
                    change: row.get(1)?,
                    price: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT url FROM item_images WHERE item_id = ?1 ORDER BY position")?;
        item.images = stmt
            .query_map(params![item.item_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        item.attributes = self.load_pairs("item_attributes", &item.item_id)?;
        item.specs = self.load_pairs("item_specs", &item.item_id)?;

        let mut stmt = self
            .conn
            .prepare("SELECT extra FROM item_extras WHERE item_id = ?1")?;
        item.extras = stmt
            .query_map(params![item.item_id], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;

        Ok(())
    }

    fn load_pairs(&self, table: &str, item_id: &str) -> StorageResult<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT key, value FROM {} WHERE item_id = ?1", table))?;
        let pairs = stmt
            .query_map(params![item_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(pairs)
    }

    // ===== Deletes =====

    /// Deletes an item; its child collections go with it
    ///
    /// Returns true if the item existed.
    pub fn delete_item_detail(&mut self, item_id: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM item_details WHERE item_id = ?1", params![item_id])?;
        Ok(removed > 0)
    }

    // ===== Statistics =====

    /// Counts rows of one entity kind
    pub fn count(&self, kind: EntityKind) -> StorageResult<u64> {
        self.count_table(kind.table())
    }

    /// Row counts of every table, parents first
    pub fn table_counts(&self) -> StorageResult<Vec<(&'static str, u64)>> {
        ALL_TABLES
            .iter()
            .map(|table| Ok((*table, self.count_table(table)?)))
            .collect()
    }

    fn count_table(&self, table: &str) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRef> {
    Ok(ListingRef {
        category_name: row.get(0)?,
        subcategory_name: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        price: row.get(4)?,
        image_url: row.get(5)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemDetail> {
    Ok(ItemDetail {
        item_id: row.get(0)?,
        link: row.get(1)?,
        category_name: row.get(2)?,
        subcategory_name: row.get(3)?,
        title: row.get(4)?,
        subtitle: row.get(5)?,
        location: row.get(6)?,
        current_price: row.get(7)?,
        description: row.get(8)?,
        price_history: Vec::new(),
        images: Vec::new(),
        attributes: BTreeMap::new(),
        specs: BTreeMap::new(),
        extras: BTreeSet::new(),
    })
}

// ===== Entity persistence =====

impl Persist for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn insert(&self, tx: &Transaction<'_>) -> rusqlite::Result<bool> {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO categories (name, url, item_count) VALUES (?1, ?2, ?3)",
            params![self.name, self.url, self.item_count as i64],
        )?;
        Ok(inserted > 0)
    }
}

impl Persist for Subcategory {
    const KIND: EntityKind = EntityKind::Subcategory;

    fn insert(&self, tx: &Transaction<'_>) -> rusqlite::Result<bool> {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO subcategories (category_name, name, url, item_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.category_name, self.name, self.url, self.item_count as i64],
        )?;
        Ok(inserted > 0)
    }
}

impl Persist for ListingRef {
    const KIND: EntityKind = EntityKind::Listing;

    fn insert(&self, tx: &Transaction<'_>) -> rusqlite::Result<bool> {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO listings
             (url, category_name, subcategory_name, title, price, image_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.url,
                self.category_name,
                self.subcategory_name,
                self.title,
                self.price,
                self.image_url
            ],
        )?;
        Ok(inserted > 0)
    }
}

impl Persist for ItemDetail {
    const KIND: EntityKind = EntityKind::ItemDetail;

    fn insert(&self, tx: &Transaction<'_>) -> rusqlite::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO item_details
             (item_id, link, category_name, subcategory_name, title, subtitle,
              location, current_price, description, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.item_id,
                self.link,
                self.category_name,
                self.subcategory_name,
                self.title,
                self.subtitle,
                self.location,
                self.current_price,
                self.description,
                now
            ],
        )?;

        // Children are only written alongside a fresh parent row
        if inserted == 0 {
            return Ok(false);
        }

        for (position, change) in self.price_history.iter().enumerate() {
            tx.execute(
                "INSERT INTO item_price_history (item_id, position, date, change, price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    self.item_id,
                    position as i64,
                    change.date,
                    change.change,
                    change.price
                ],
            )?;
        }

        for (position, url) in self.images.iter().enumerate() {
            tx.execute(
                "INSERT INTO item_images (item_id, position, url) VALUES (?1, ?2, ?3)",
                params![self.item_id, position as i64, url],
            )?;
        }

        for (key, value) in &self.attributes {
            tx.execute(
                "INSERT OR IGNORE INTO item_attributes (item_id, key, value) VALUES (?1, ?2, ?3)",
                params![self.item_id, key, value],
            )?;
        }

        for (key, value) in &self.specs {
            tx.execute(
                "INSERT OR IGNORE INTO item_specs (item_id, key, value) VALUES (?1, ?2, ?3)",
                params![self.item_id, key, value],
            )?;
        }

        for extra in &self.extras {
            tx.execute(
                "INSERT OR IGNORE INTO item_extras (item_id, extra) VALUES (?1, ?2)",
                params![self.item_id, extra],
            )?;
        }

        Ok(true)
    }
}
