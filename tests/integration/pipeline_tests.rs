//! Integration tests for the harvest pipeline
//!
//! These tests drive the real parser, store and worker pool against an
//! in-memory catalog site served by a stub fetcher, with a stub egress
//! standing in for the Tor process.

use async_trait::async_trait;
use catalog_harvester::catalog::ListingRef;
use catalog_harvester::config::{
    Config, CrawlerConfig, EgressConfig, SelectorConfig, SessionConfig, StorageConfig,
};
use catalog_harvester::crawler::{
    AttemptError, FetchFailure, Fetcher, SelectorParser, Stage,
};
use catalog_harvester::egress::{Egress, EgressError, EgressState};
use catalog_harvester::output::read_unit_file;
use catalog_harvester::storage::{EntityKind, SqliteStorage};
use catalog_harvester::workspace::{RunId, RunWorkspace};
use catalog_harvester::{run_full_pipeline, run_stage_only, ItemDetail};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BASE: &str = "https://catalog.test/";
const PROXY: &str = "socks5h://127.0.0.1:9050";

/// Serves pages from a map; unknown URLs fail every attempt
#[derive(Default)]
struct StubSite {
    pages: HashMap<String, String>,
    calls: Mutex<HashMap<String, u32>>,
    proxies: Mutex<Vec<String>>,
    total: AtomicU32,
}

impl StubSite {
    fn with(mut self, url: &str, html: String) -> Self {
        self.pages.insert(url.to_string(), html);
        self
    }

    fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubSite {
    async fn fetch(
        &self,
        url: &str,
        proxy: &str,
        max_attempts: u32,
    ) -> Result<String, FetchFailure> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;
        self.proxies.lock().unwrap().push(proxy.to_string());

        self.pages.get(url).cloned().ok_or_else(|| FetchFailure {
            url: url.to_string(),
            attempts: max_attempts,
            last_error: AttemptError::Status(404),
        })
    }
}

/// Records lifecycle calls instead of spawning a process
#[derive(Default)]
struct StubEgress {
    fail_start: bool,
    starts: u32,
    stops: u32,
    running: bool,
}

#[async_trait]
impl Egress for StubEgress {
    async fn start(&mut self) -> Result<(), EgressError> {
        self.starts += 1;
        if self.fail_start {
            return Err(EgressError::Exited("exit status: 1".to_string()));
        }
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) {
        self.stops += 1;
        self.running = false;
    }

    fn proxy_endpoint(&self) -> String {
        PROXY.to_string()
    }

    fn state(&self) -> EgressState {
        if self.running {
            EgressState::Running
        } else {
            EgressState::Stopped
        }
    }
}

fn test_config(output: &Path, fetch_item_details: bool) -> Config {
    Config {
        crawler: CrawlerConfig {
            base_url: BASE.to_string(),
            pool_size: 4,
            max_attempts: 2,
            attempt_timeout_secs: 5,
            item_batch_size: 2,
            fetch_item_details,
            paginate_categories: false,
        },
        session: SessionConfig::default(),
        egress: EgressConfig::default(),
        storage: StorageConfig {
            output_dir: output.display().to_string(),
            busy_timeout_ms: 5000,
            insert_attempts: 5,
            retry_delay_ms: 10,
            retry_jitter_ms: 10,
        },
        selectors: SelectorConfig::default(),
    }
}

fn parser() -> Arc<SelectorParser> {
    Arc::new(SelectorParser::new(&SelectorConfig::default(), BASE).unwrap())
}

// ===== Fixture pages =====

fn entry(href: &str, name: &str, count: u32) -> String {
    format!(
        r#"<nobr><a href="{}"><span>{}</span> <n>({})</n></a></nobr>"#,
        href, name, count
    )
}

fn brands_page(brands: &[(&str, &str, u32)]) -> String {
    let entries: String = brands
        .iter()
        .map(|(href, name, count)| entry(href, name, *count))
        .collect();
    format!(
        r#"<html><body><div class="marki">{}{}</div></body></html>"#,
        entry("/all", "--All brands--", 999),
        entries
    )
}

fn category_page(models: &[(&str, &str, u32)]) -> String {
    let entries: String = models
        .iter()
        .map(|(href, name, count)| entry(href, name, *count))
        .collect();
    format!(
        r#"<html><body>
        <div class="marki">{}</div>
        <div class="marki">{}{}</div>
        </body></html>"#,
        entry("/bmw", "BMW", 120),
        entry("/bmw/all", "--All models--", 120),
        entries
    )
}

fn listing_page(items: impl Iterator<Item = u32>, last_page: Option<u32>) -> String {
    let listings: String = items
        .map(|n| {
            format!(
                r#"<div class="item">
                    <div class="zaglavie"><a class="title" href="/item/{n}">Car {n}</a></div>
                    <div class="price"><div>{n}000 EUR</div></div>
                </div>"#
            )
        })
        .collect();

    let pagination = match last_page {
        Some(last) => format!(
            r#"<div class="pagination"><div>1</div><div>{}</div><a class="saveSlink next" href="p-2">Next</a></div>"#,
            last
        ),
        None => String::new(),
    };

    format!(
        r#"<html><body><div class="ads2023">{}<div class="item fakti"></div></div>{}</body></html>"#,
        listings, pagination
    )
}

fn item_page(n: u32) -> String {
    format!(
        r#"<html><body><div class="ad2023">
            <div class="obTitle"><h1>Car {n} <span>Trim</span><div class="obiava">Обява: 900{n}</div></h1></div>
            <div class="carLocation"><span>Намира се в гр. София</span></div>
            <div class="Price">{n}000 EUR</div>
            <div class="carExtri"><div class="items"><div>Navigation</div></div></div>
        </div></body></html>"#
    )
}

fn bmw_site() -> StubSite {
    StubSite::default()
        .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
        .with(
            "https://catalog.test/bmw",
            category_page(&[("/bmw/x5", "X5", 30), ("/bmw/m3", "M3", 12), ("/bmw/x3", "X3", 8)]),
        )
}

// ===== Workspace helpers =====

fn only_run(base: &Path) -> RunWorkspace {
    let runs: Vec<_> = std::fs::read_dir(base)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(runs.len(), 1, "expected exactly one run, found {:?}", runs);

    RunWorkspace::open(base, &RunId::parse(&runs[0]).unwrap()).unwrap()
}

fn store(workspace: &RunWorkspace) -> SqliteStorage {
    SqliteStorage::open(&workspace.store_path(), Duration::from_secs(5)).unwrap()
}

// ===== Tests =====

#[tokio::test]
async fn test_full_pipeline_harvests_each_level() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(
        bmw_site()
            .with("https://catalog.test/bmw/x5", listing_page(1..=3, None))
            .with("https://catalog.test/bmw/m3", listing_page(4..=5, None))
            .with("https://catalog.test/bmw/x3", listing_page(6..=6, None)),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    assert_eq!(egress.starts, 1);
    assert_eq!(egress.stops, 1);
    assert!(site.proxies.lock().unwrap().iter().all(|p| p == PROXY));

    let workspace = only_run(output.path());
    let storage = store(&workspace);
    assert_eq!(storage.count(EntityKind::Category).unwrap(), 1);
    assert_eq!(storage.count(EntityKind::Subcategory).unwrap(), 3);
    assert_eq!(storage.count(EntityKind::Listing).unwrap(), 6);
    assert_eq!(storage.count(EntityKind::ItemDetail).unwrap(), 0);

    let subcategories = storage.load_subcategories_of("BMW").unwrap();
    let names: Vec<_> = subcategories.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["X5", "M3", "X3"]);

    let merged: Vec<ListingRef> = read_unit_file(&workspace.merged_listings_path()).unwrap();
    assert_eq!(merged.len(), 6);
    assert!(!workspace.merged_items_path().exists());
}

#[tokio::test]
async fn test_paginated_listings_are_deduplicated() {
    let output = TempDir::new().unwrap();
    // Item 10 appears on both pages
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 19)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=10, Some(2)))
            .with("https://catalog.test/bmw/x5/p-2", listing_page(10..=19, Some(2))),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    assert_eq!(site.calls("https://catalog.test/bmw/x5"), 1);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-2"), 1);

    let workspace = only_run(output.path());
    assert_eq!(store(&workspace).count(EntityKind::Listing).unwrap(), 19);

    let merged: Vec<ListingRef> = read_unit_file(&workspace.merged_listings_path()).unwrap();
    assert_eq!(merged.len(), 19);
}

#[tokio::test]
async fn test_missing_pagination_fetches_single_page() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 4)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=4, None)),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    assert_eq!(site.calls("https://catalog.test/bmw/x5"), 1);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-2"), 0);
    assert_eq!(
        store(&only_run(output.path()))
            .count(EntityKind::Listing)
            .unwrap(),
        4
    );
}

#[tokio::test]
async fn test_zero_categories_aborts_run() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 1)])),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(!ok);
    assert_eq!(site.total_calls(), 1);
    assert_eq!(site.calls("https://catalog.test/bmw"), 0);
    assert_eq!(egress.stops, 1);
    assert_eq!(egress.state(), EgressState::Stopped);
}

#[tokio::test]
async fn test_unreachable_base_page_aborts_run() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(StubSite::default());
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(!ok);
    assert_eq!(site.total_calls(), 1);
    assert_eq!(egress.stops, 1);
}

#[tokio::test]
async fn test_listing_stage_runs_despite_subcategory_failures() {
    let output = TempDir::new().unwrap();
    // The Audi category page is never served
    let site = Arc::new(
        StubSite::default()
            .with(
                BASE,
                brands_page(&[("/bmw", "BMW", 120), ("/audi", "Audi", 40)]),
            )
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 2)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=2, None)),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    assert_eq!(site.calls("https://catalog.test/audi"), 1);

    let storage = store(&only_run(output.path()));
    assert_eq!(storage.count(EntityKind::Category).unwrap(), 2);
    assert_eq!(storage.count(EntityKind::Subcategory).unwrap(), 1);
    assert_eq!(storage.count(EntityKind::Listing).unwrap(), 2);
}

#[tokio::test]
async fn test_item_rerun_skips_fetched_items_and_keeps_merge_complete() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 3)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=3, None))
            .with("https://catalog.test/item/1", item_page(1))
            .with("https://catalog.test/item/2", item_page(2))
            .with("https://catalog.test/item/3", item_page(3)),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), true),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;
    assert!(ok);

    let workspace = only_run(output.path());
    assert_eq!(store(&workspace).count(EntityKind::ItemDetail).unwrap(), 3);

    let rerun = run_stage_only(
        test_config(output.path(), true),
        Stage::ItemDetails,
        Some(workspace.id().as_str()),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;
    assert!(rerun);
    // Listings with a stored item are not fetched again
    for n in 1..=3 {
        assert_eq!(site.calls(&format!("https://catalog.test/item/{}", n)), 1);
    }

    let storage = store(&workspace);
    assert_eq!(storage.count(EntityKind::ItemDetail).unwrap(), 3);
    let item = storage.load_item_detail("9001").unwrap().unwrap();
    assert_eq!(item.title, "Car 1");
    assert_eq!(item.location, "гр. София");
    assert_eq!(item.extras.len(), 1);

    let merged: Vec<ItemDetail> = read_unit_file(&workspace.merged_items_path()).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(egress.starts, 2);
    assert_eq!(egress.stops, 2);
}

#[tokio::test]
async fn test_item_batch_with_one_missing_page_keeps_the_rest() {
    let output = TempDir::new().unwrap();
    // Item 2 is never served; batch size 2 puts it next to item 1
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 3)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=3, None))
            .with("https://catalog.test/item/1", item_page(1))
            .with("https://catalog.test/item/3", item_page(3)),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), true),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    let storage = store(&only_run(output.path()));
    assert_eq!(storage.count(EntityKind::ItemDetail).unwrap(), 2);
    assert!(storage.load_item_detail("9002").unwrap().is_none());
}

#[tokio::test]
async fn test_egress_startup_failure_prevents_fetching() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(bmw_site());
    let mut egress = StubEgress {
        fail_start: true,
        ..StubEgress::default()
    };

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(!ok);
    assert_eq!(site.total_calls(), 0);
    assert_eq!(egress.starts, 1);
    assert_eq!(egress.stops, 1);
}

#[tokio::test]
async fn test_stages_resume_from_persisted_inputs() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(bmw_site());
    let mut egress = StubEgress::default();

    let first = run_stage_only(
        test_config(output.path(), false),
        Stage::Categories,
        None,
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;
    assert!(first);
    assert_eq!(site.calls("https://catalog.test/bmw"), 0);

    let workspace = only_run(output.path());
    let second = run_stage_only(
        test_config(output.path(), false),
        Stage::Subcategories,
        Some(workspace.id().as_str()),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(second);
    assert_eq!(site.calls(BASE), 1);
    assert_eq!(site.calls("https://catalog.test/bmw"), 1);
    assert_eq!(
        store(&workspace).count(EntityKind::Subcategory).unwrap(),
        3
    );
}

#[tokio::test]
async fn test_later_stage_without_run_id_is_rejected() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(bmw_site());
    let mut egress = StubEgress::default();

    let ok = run_stage_only(
        test_config(output.path(), false),
        Stage::Listings,
        None,
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(!ok);
    assert_eq!(egress.starts, 0);
    assert_eq!(site.total_calls(), 0);
}

#[tokio::test]
async fn test_stage_with_empty_input_reports_failure() {
    let output = TempDir::new().unwrap();
    let site = Arc::new(bmw_site());
    let mut egress = StubEgress::default();

    // Stage 1 succeeds but no subcategory exists yet, so Stage 3 has no work
    assert!(
        run_stage_only(
            test_config(output.path(), false),
            Stage::Categories,
            None,
            &mut egress,
            Arc::clone(&site),
            parser(),
        )
        .await
    );
    let workspace = only_run(output.path());

    let ok = run_stage_only(
        test_config(output.path(), false),
        Stage::Listings,
        Some(workspace.id().as_str()),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(!ok);
    assert_eq!(site.total_calls(), 1);
}

#[tokio::test]
async fn test_pagination_skips_failed_pages_and_stops_on_empty_page() {
    let output = TempDir::new().unwrap();
    // Five pages declared; page 2 is never served, page 4 is empty
    let site = Arc::new(
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 12)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=3, Some(5)))
            .with("https://catalog.test/bmw/x5/p-3", listing_page(4..=6, Some(5)))
            .with("https://catalog.test/bmw/x5/p-4", listing_page(1..1, Some(5)))
            .with("https://catalog.test/bmw/x5/p-5", listing_page(7..=9, Some(5))),
    );
    let mut egress = StubEgress::default();

    let ok = run_full_pipeline(
        test_config(output.path(), false),
        &mut egress,
        Arc::clone(&site),
        parser(),
    )
    .await;

    assert!(ok);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-2"), 1);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-3"), 1);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-4"), 1);
    assert_eq!(site.calls("https://catalog.test/bmw/x5/p-5"), 0);

    let workspace = only_run(output.path());
    assert_eq!(store(&workspace).count(EntityKind::Listing).unwrap(), 6);
}

#[tokio::test]
async fn test_item_rerun_fetches_only_items_missing_from_earlier_pass() {
    let output = TempDir::new().unwrap();
    let site = || {
        StubSite::default()
            .with(BASE, brands_page(&[("/bmw", "BMW", 120)]))
            .with("https://catalog.test/bmw", category_page(&[("/bmw/x5", "X5", 3)]))
            .with("https://catalog.test/bmw/x5", listing_page(1..=3, None))
            .with("https://catalog.test/item/1", item_page(1))
            .with("https://catalog.test/item/3", item_page(3))
    };
    let mut egress = StubEgress::default();

    // Item 2 is unavailable during the first pass
    let first = Arc::new(site());
    assert!(
        run_full_pipeline(
            test_config(output.path(), true),
            &mut egress,
            Arc::clone(&first),
            parser(),
        )
        .await
    );
    let workspace = only_run(output.path());
    assert_eq!(store(&workspace).count(EntityKind::ItemDetail).unwrap(), 2);

    let second = Arc::new(site().with("https://catalog.test/item/2", item_page(2)));
    let rerun = run_stage_only(
        test_config(output.path(), true),
        Stage::ItemDetails,
        Some(workspace.id().as_str()),
        &mut egress,
        Arc::clone(&second),
        parser(),
    )
    .await;

    assert!(rerun);
    assert_eq!(second.total_calls(), 1);
    assert_eq!(second.calls("https://catalog.test/item/2"), 1);
    assert_eq!(store(&workspace).count(EntityKind::ItemDetail).unwrap(), 3);

    // The merged collection covers both passes
    let merged: Vec<ItemDetail> = read_unit_file(&workspace.merged_items_path()).unwrap();
    assert_eq!(merged.len(), 3);
}
