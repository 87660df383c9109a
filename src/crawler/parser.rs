//! Parser boundary and the selector-driven catalog parser
//!
//! Parsing is a pure transform from raw markup to typed records: no I/O and
//! no retries. Selectors come from the `[selectors]` configuration section and
//! are compiled once.
//!
//! **Extraction rules:**
//! - Category/subcategory entries carry a name and a "(123)" count; entries
//!   whose name starts with the placeholder prefix ("all items") are skipped
//! - Links are resolved against the base URL, including protocol-relative
//!   `//host/path` forms
//! - Listing extraction stops at the first entry carrying the stop class
//! - Item ids are reduced to digits and rejected when nothing is left
//! - Pagination is read from the element just before the "next" button and
//!   falls back to a single page on any irregularity

use crate::catalog::{is_valid_item_id, Category, ItemDetail, ListingRef, PriceChange, Subcategory};
use crate::config::SelectorConfig;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors raised while parsing a page
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing element '{0}'")]
    Missing(String),

    #[error("invalid item id '{0}'")]
    InvalidItemId(String),
}

/// Raw markup to catalog records
pub trait CatalogParser: Send + Sync {
    fn parse_categories(&self, html: &str) -> Result<Vec<Category>, ParseError>;

    fn parse_subcategories(
        &self,
        html: &str,
        category_name: &str,
    ) -> Result<Vec<Subcategory>, ParseError>;

    fn parse_listings(
        &self,
        html: &str,
        category_name: &str,
        subcategory_name: &str,
    ) -> Result<Vec<ListingRef>, ParseError>;

    fn parse_item_detail(
        &self,
        html: &str,
        url: &str,
        category_name: &str,
        subcategory_name: &str,
    ) -> Result<ItemDetail, ParseError>;

    /// Declared number of pages; 1 when it cannot be determined
    fn extract_last_page(&self, html: &str) -> u32;

    /// URL of page `page` (2 and up) of a paginated listing
    fn page_url(&self, base: &str, page: u32) -> String {
        format!("{}/p-{}", base.trim_end_matches('/'), page)
    }
}

/// Compiled selectors for every extracted field
struct Selectors {
    category_link: Selector,
    subcategory_container: Selector,
    subcategory_link: Selector,
    entry_name: Selector,
    entry_count: Selector,
    pagination: Selector,
    pagination_next: Selector,
    listing_item: Selector,
    listing_title: Selector,
    listing_price: Selector,
    listing_image: Selector,
    item_wrapper: Selector,
    item_title: Selector,
    item_subtitle: Selector,
    item_id: Selector,
    item_location: Selector,
    item_price: Selector,
    item_price_history: Selector,
    item_images: Selector,
    item_attribute: Selector,
    item_attribute_label: Selector,
    item_attribute_value: Selector,
    item_spec: Selector,
    item_description: Selector,
    item_extra: Selector,
    div: Selector,
}

/// Parser driven by configurable CSS selectors
pub struct SelectorParser {
    selectors: Selectors,
    base_url: Url,
    subcategory_container_index: usize,
    placeholder_prefix: String,
    listing_stop_class: String,
    item_location_prefix: String,
}

impl SelectorParser {
    /// Compiles every selector of `config`
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidSelector` for the first selector that does not
    /// parse, `ConfigError::InvalidUrl` for a bad base URL.
    pub fn new(config: &SelectorConfig, base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let selectors = Selectors {
            category_link: compile(&config.category_link)?,
            subcategory_container: compile(&config.subcategory_container)?,
            subcategory_link: compile(&config.subcategory_link)?,
            entry_name: compile(&config.entry_name)?,
            entry_count: compile(&config.entry_count)?,
            pagination: compile(&config.pagination)?,
            pagination_next: compile(&config.pagination_next)?,
            listing_item: compile(&config.listing_item)?,
            listing_title: compile(&config.listing_title)?,
            listing_price: compile(&config.listing_price)?,
            listing_image: compile(&config.listing_image)?,
            item_wrapper: compile(&config.item_wrapper)?,
            item_title: compile(&config.item_title)?,
            item_subtitle: compile(&config.item_subtitle)?,
            item_id: compile(&config.item_id)?,
            item_location: compile(&config.item_location)?,
            item_price: compile(&config.item_price)?,
            item_price_history: compile(&config.item_price_history)?,
            item_images: compile(&config.item_images)?,
            item_attribute: compile(&config.item_attribute)?,
            item_attribute_label: compile(&config.item_attribute_label)?,
            item_attribute_value: compile(&config.item_attribute_value)?,
            item_spec: compile(&config.item_spec)?,
            item_description: compile(&config.item_description)?,
            item_extra: compile(&config.item_extra)?,
            div: compile("div")?,
        };

        Ok(Self {
            selectors,
            base_url,
            subcategory_container_index: config.subcategory_container_index,
            placeholder_prefix: config.placeholder_prefix.clone(),
            listing_stop_class: config.listing_stop_class.clone(),
            item_location_prefix: config.item_location_prefix.clone(),
        })
    }

    /// Reads the name, count and link of one category/subcategory anchor
    fn parse_entry(&self, link: ElementRef<'_>) -> Option<(String, u64, String)> {
        let name = link
            .select(&self.selectors.entry_name)
            .next()
            .map(text_of)
            .filter(|name| !name.is_empty())?;

        if !self.placeholder_prefix.is_empty() && name.starts_with(&self.placeholder_prefix) {
            return None;
        }

        let count = link
            .select(&self.selectors.entry_count)
            .next()
            .map(|n| parse_count(&text_of(n)))
            .unwrap_or(0);

        let url = match link.value().attr("href").and_then(|h| self.resolve(h)) {
            Some(url) => url,
            None => {
                debug!(name = %name, "Entry without usable link skipped");
                return None;
            }
        };

        Some((name, count, url))
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }

        match self.base_url.join(href) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url.to_string()),
            _ => None,
        }
    }
}

impl CatalogParser for SelectorParser {
    fn parse_categories(&self, html: &str) -> Result<Vec<Category>, ParseError> {
        let document = Html::parse_document(html);

        let mut categories: Vec<Category> = document
            .select(&self.selectors.category_link)
            .filter_map(|link| self.parse_entry(link))
            .map(|(name, item_count, url)| Category {
                name,
                url,
                item_count,
            })
            .collect();

        categories.sort_by(|a, b| b.item_count.cmp(&a.item_count));
        Ok(categories)
    }

    fn parse_subcategories(
        &self,
        html: &str,
        category_name: &str,
    ) -> Result<Vec<Subcategory>, ParseError> {
        let document = Html::parse_document(html);

        let Some(container) = document
            .select(&self.selectors.subcategory_container)
            .nth(self.subcategory_container_index)
        else {
            warn!(category = category_name, "Subcategory container not found");
            return Ok(Vec::new());
        };

        Ok(container
            .select(&self.selectors.subcategory_link)
            .filter_map(|link| self.parse_entry(link))
            .map(|(name, item_count, url)| Subcategory {
                category_name: category_name.to_string(),
                name,
                url,
                item_count,
            })
            .collect())
    }

    fn parse_listings(
        &self,
        html: &str,
        category_name: &str,
        subcategory_name: &str,
    ) -> Result<Vec<ListingRef>, ParseError> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for item in document.select(&self.selectors.listing_item) {
            if item
                .value()
                .classes()
                .any(|class| class == self.listing_stop_class)
            {
                break;
            }

            let Some(title_link) = item.select(&self.selectors.listing_title).next() else {
                debug!("Listing without title link skipped");
                continue;
            };
            let Some(url) = title_link.value().attr("href").and_then(|h| self.resolve(h))
            else {
                debug!("Listing without usable link skipped");
                continue;
            };

            let price = item
                .select(&self.selectors.listing_price)
                .next()
                .map(text_of)
                .filter(|p| !p.is_empty());

            let image_url = item
                .select(&self.selectors.listing_image)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(|src| self.resolve(src));

            listings.push(ListingRef {
                category_name: category_name.to_string(),
                subcategory_name: subcategory_name.to_string(),
                title: text_of(title_link),
                url,
                price,
                image_url,
            });
        }

        Ok(listings)
    }

    fn parse_item_detail(
        &self,
        html: &str,
        url: &str,
        category_name: &str,
        subcategory_name: &str,
    ) -> Result<ItemDetail, ParseError> {
        let document = Html::parse_document(html);
        let sel = &self.selectors;

        let wrapper = document
            .select(&sel.item_wrapper)
            .next()
            .ok_or_else(|| ParseError::Missing("item wrapper".to_string()))?;

        let raw_id = wrapper
            .select(&sel.item_id)
            .next()
            .map(text_of)
            .ok_or_else(|| ParseError::Missing("item id".to_string()))?;
        let item_id: String = raw_id.chars().filter(|c| c.is_ascii_digit()).collect();
        if !is_valid_item_id(&item_id) {
            return Err(ParseError::InvalidItemId(raw_id));
        }

        // The heading's own text, without the nested subtitle and id elements
        let title = wrapper
            .select(&sel.item_title)
            .next()
            .and_then(|h1| {
                h1.children()
                    .filter_map(|node| node.value().as_text())
                    .map(|text| collapse_whitespace(text))
                    .find(|text| !text.is_empty())
            })
            .unwrap_or_default();

        let subtitle = first_text(wrapper, &sel.item_subtitle);

        let location = first_text(wrapper, &sel.item_location)
            .trim_start_matches(self.item_location_prefix.as_str())
            .trim()
            .to_string();

        let current_price = wrapper
            .select(&sel.item_price)
            .next()
            .and_then(|price| price.text().map(str::trim).find(|t| !t.is_empty()))
            .unwrap_or_default()
            .to_string();

        // A header row of three cells, then (date, change, price) triples
        let history_cells: Vec<String> = wrapper
            .select(&sel.item_price_history)
            .map(text_of)
            .collect();
        let price_history = history_cells
            .get(3..)
            .unwrap_or_default()
            .chunks_exact(3)
            .map(|row| PriceChange {
                date: row[0].clone(),
                change: row[1].clone(),
                price: row[2].clone(),
            })
            .collect();

        let images = wrapper
            .select(&sel.item_images)
            .filter_map(|img| img.value().attr("src"))
            .filter_map(|src| self.resolve(src))
            .collect();

        let mut attributes = BTreeMap::new();
        for entry in wrapper.select(&sel.item_attribute) {
            let label = entry.select(&sel.item_attribute_label).next().map(text_of);
            let value = entry.select(&sel.item_attribute_value).next().map(text_of);
            if let (Some(label), Some(value)) = (label, value) {
                attributes.insert(label, value);
            }
        }

        let mut specs = BTreeMap::new();
        for entry in wrapper.select(&sel.item_spec) {
            let mut cells = entry.select(&sel.div).map(text_of);
            if let (Some(key), Some(value)) = (cells.next(), cells.next()) {
                specs.insert(key, value);
            }
        }

        let extras: BTreeSet<String> = wrapper
            .select(&sel.item_extra)
            .map(text_of)
            .filter(|extra| !extra.is_empty())
            .collect();

        let description = first_text(wrapper, &sel.item_description);

        Ok(ItemDetail {
            item_id,
            link: url.to_string(),
            category_name: category_name.to_string(),
            subcategory_name: subcategory_name.to_string(),
            title,
            subtitle,
            location,
            current_price,
            price_history,
            images,
            attributes,
            specs,
            extras,
            description,
        })
    }

    fn extract_last_page(&self, html: &str) -> u32 {
        let document = Html::parse_document(html);

        let Some(pagination) = document.select(&self.selectors.pagination).next() else {
            debug!("No pagination found, assuming a single page");
            return 1;
        };
        let Some(next) = pagination.select(&self.selectors.pagination_next).next() else {
            debug!("No next-page button, assuming a single page");
            return 1;
        };

        let last = next
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sibling| sibling.value().name() == "div")
            .and_then(|div| text_of(div).parse::<u32>().ok());

        match last {
            Some(page) if page >= 1 => page,
            _ => {
                warn!("Could not read last page number, assuming a single page");
                1
            }
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Whitespace-collapsed text content of an element
fn text_of(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope.select(selector).next().map(text_of).unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses "(1 234)" style counts; the count is advisory so junk reads as 0
fn parse_count(raw: &str) -> u64 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}
