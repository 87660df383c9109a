//! Database schema definitions
//!
//! This module contains all SQL schema definitions for a run's store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Top-level categories (Stage 1)
CREATE TABLE IF NOT EXISTS categories (
    name TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0
);

-- Subcategories keyed by their parent (Stage 2)
CREATE TABLE IF NOT EXISTS subcategories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category_name TEXT NOT NULL REFERENCES categories(name) ON DELETE CASCADE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(category_name, name)
);

CREATE INDEX IF NOT EXISTS idx_subcategories_category ON subcategories(category_name);

-- Listing references (Stage 3)
CREATE TABLE IF NOT EXISTS listings (
    url TEXT PRIMARY KEY,
    category_name TEXT NOT NULL,
    subcategory_name TEXT NOT NULL,
    title TEXT NOT NULL,
    price TEXT,
    image_url TEXT
);

CREATE INDEX IF NOT EXISTS idx_listings_parent ON listings(category_name, subcategory_name);

-- Item details (Stage 4)
CREATE TABLE IF NOT EXISTS item_details (
    item_id TEXT PRIMARY KEY,
    link TEXT NOT NULL UNIQUE,
    category_name TEXT NOT NULL,
    subcategory_name TEXT NOT NULL,
    title TEXT NOT NULL,
    subtitle TEXT NOT NULL,
    location TEXT NOT NULL,
    current_price TEXT NOT NULL,
    description TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

-- Child collections, owned by their item
CREATE TABLE IF NOT EXISTS item_price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES item_details(item_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    date TEXT NOT NULL,
    change TEXT NOT NULL,
    price TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES item_details(item_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_attributes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES item_details(item_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(item_id, key)
);

CREATE TABLE IF NOT EXISTS item_specs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES item_details(item_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(item_id, key)
);

CREATE TABLE IF NOT EXISTS item_extras (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES item_details(item_id) ON DELETE CASCADE,
    extra TEXT NOT NULL,
    UNIQUE(item_id, extra)
);

CREATE INDEX IF NOT EXISTS idx_item_price_history_item ON item_price_history(item_id);
CREATE INDEX IF NOT EXISTS idx_item_images_item ON item_images(item_id);
CREATE INDEX IF NOT EXISTS idx_item_attributes_item ON item_attributes(item_id);
CREATE INDEX IF NOT EXISTS idx_item_specs_item ON item_specs(item_id);
CREATE INDEX IF NOT EXISTS idx_item_extras_item ON item_extras(item_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
