//! Harvest coordinator - stage orchestration logic
//!
//! This module sequences the stages of a run, including:
//! - Walking the pipeline state machine
//! - Gating the run on Stage 1 producing categories
//! - Dispatching Stages 2-4 to the worker pool, each only after the previous
//!   stage has drained
//! - Merging the final stage's unit files
//! - Owning the egress lifecycle for the entry points

use crate::catalog::{ItemDetail, ListingRef};
use crate::config::Config;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::parser::CatalogParser;
use crate::crawler::pool::{panic_message, StageReport, WorkerPool};
use crate::crawler::unit::{self, UnitContext};
use crate::egress::Egress;
use crate::output::{merge_unit_files, unit_slug, MergeSummary};
use crate::state::PipelineState;
use crate::storage::{EntityKind, StoreHandle, WriteSettings};
use crate::workspace::{RunId, RunWorkspace};
use crate::{HarvestError, Result};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One phase of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Categories,
    Subcategories,
    Listings,
    ItemDetails,
}

impl Stage {
    /// Parses the 1-based stage number used on the command line
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Categories),
            2 => Some(Self::Subcategories),
            3 => Some(Self::Listings),
            4 => Some(Self::ItemDetails),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            Self::Categories => 1,
            Self::Subcategories => 2,
            Self::Listings => 3,
            Self::ItemDetails => 4,
        }
    }

    /// Pipeline state the run is in while this stage executes
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Categories => PipelineState::Stage1,
            Self::Subcategories => PipelineState::Stage2,
            Self::Listings => PipelineState::Stage3,
            Self::ItemDetails => PipelineState::Stage4,
        }
    }

    /// Entity this stage produces
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Categories => EntityKind::Category,
            Self::Subcategories => EntityKind::Subcategory,
            Self::Listings => EntityKind::Listing,
            Self::ItemDetails => EntityKind::ItemDetail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Subcategories => "subcategories",
            Self::Listings => "listings",
            Self::ItemDetails => "item-details",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrates the stages of one run
pub struct Harvester<F, P> {
    config: Config,
    workspace: RunWorkspace,
    store: StoreHandle,
    fetcher: Arc<F>,
    parser: Arc<P>,
    proxy: String,
    state: PipelineState,
}

impl<F, P> Harvester<F, P>
where
    F: Fetcher + 'static,
    P: CatalogParser + 'static,
{
    /// Creates a harvester for `workspace`
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `workspace` - The run's workspace (fresh or re-entered)
    /// * `fetcher` - Fetch client shared by every unit
    /// * `parser` - Parser shared by every unit
    /// * `proxy` - Egress endpoint every fetch is routed through
    pub fn new(
        config: Config,
        workspace: RunWorkspace,
        fetcher: Arc<F>,
        parser: Arc<P>,
        proxy: impl Into<String>,
    ) -> Self {
        let store = StoreHandle::new(
            workspace.store_path(),
            WriteSettings::from(&config.storage),
        );

        Self {
            config,
            workspace,
            store,
            fetcher,
            parser,
            proxy: proxy.into(),
            state: PipelineState::Init,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn workspace(&self) -> &RunWorkspace {
        &self.workspace
    }

    /// Runs every stage in order, then merges the final stage
    ///
    /// Only a Stage 1 without categories aborts the run; unit failures in
    /// later stages are absorbed by the pool.
    pub async fn run_all(&mut self) -> Result<()> {
        info!(run = %self.workspace.id(), "Starting full pipeline");
        let result = self.run_all_stages().await;
        self.settle(result)
    }

    /// Runs a single stage against the workspace's persisted inputs
    ///
    /// Returns the number of stored entities of the stage's kind.
    pub async fn run_stage(&mut self, stage: Stage) -> Result<u64> {
        info!(run = %self.workspace.id(), %stage, "Starting standalone stage");
        let result = self.run_single_stage(stage).await;
        self.settle(result)
    }

    async fn run_all_stages(&mut self) -> Result<()> {
        self.transition(PipelineState::Stage1)?;
        self.stage_categories().await?;

        self.transition(PipelineState::Stage2)?;
        self.stage_subcategories().await?;

        self.transition(PipelineState::Stage3)?;
        let listings = self.stage_listings().await?;

        let (final_stage, final_report) = if self.config.crawler.fetch_item_details {
            self.transition(PipelineState::Stage4)?;
            (Stage::ItemDetails, self.stage_items().await?)
        } else {
            info!("Item details disabled, merging listings");
            (Stage::Listings, listings)
        };

        self.transition(PipelineState::Merge)?;
        self.merge(final_stage, &final_report).await?;

        self.transition(PipelineState::Done)?;
        info!(run = %self.workspace.id(), "Pipeline finished");
        Ok(())
    }

    async fn run_single_stage(&mut self, stage: Stage) -> Result<u64> {
        self.transition(stage.state())?;

        match stage {
            Stage::Categories => {
                self.stage_categories().await?;
            }
            Stage::Subcategories => {
                self.stage_subcategories().await?;
            }
            Stage::Listings => {
                let report = self.stage_listings().await?;
                self.transition(PipelineState::Merge)?;
                self.merge(stage, &report).await?;
            }
            Stage::ItemDetails => {
                let report = self.stage_items().await?;
                self.transition(PipelineState::Merge)?;
                self.merge(stage, &report).await?;
            }
        }

        self.transition(PipelineState::Done)?;
        self.count(stage.entity()).await
    }

    fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        info!(from = %self.state, to = %next, "Pipeline state changed");
        self.state = next;
        Ok(())
    }

    /// Moves the run to `Failed` when `result` is an error
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!(run = %self.workspace.id(), state = %self.state, error = %err, "Run failed");
            if self.state.can_transition_to(PipelineState::Failed) {
                self.state = PipelineState::Failed;
            }
        }
        result
    }

    fn unit_context(&self) -> Arc<UnitContext<F, P>> {
        Arc::new(UnitContext {
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            store: self.store.clone(),
            proxy: self.proxy.clone(),
            max_attempts: self.config.crawler.max_attempts,
            paginate_categories: self.config.crawler.paginate_categories,
            listing_units_dir: self.workspace.listing_units_dir(),
            item_units_dir: self.workspace.item_units_dir(),
        })
    }

    fn pool(&self, stage: Stage) -> WorkerPool {
        WorkerPool::new(stage, self.config.crawler.pool_size as usize)
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        Ok(self.store.read(move |storage| storage.count(kind)).await?)
    }

    // ===== Stages =====

    /// Stage 1: the category list, fetched once and serially
    async fn stage_categories(&self) -> Result<u64> {
        let url = self.config.crawler.base_url.as_str();

        match self
            .fetcher
            .fetch(url, &self.proxy, self.config.crawler.max_attempts)
            .await
        {
            Ok(html) => match self.parser.parse_categories(&html) {
                Ok(categories) => {
                    info!(found = categories.len(), "Categories parsed");
                    unit::store(&self.store, categories).await;
                }
                Err(err) => warn!(url, error = %err, "Category page parse failed"),
            },
            Err(err) => warn!(url, error = %err, "Category page fetch failed"),
        }

        let stored = self.count(EntityKind::Category).await?;
        if stored == 0 {
            return Err(HarvestError::CriticalPhase(format!(
                "no categories found at {}",
                url
            )));
        }

        info!(categories = stored, "Categories ready");
        Ok(stored)
    }

    /// Stage 2: one unit per stored category
    async fn stage_subcategories(&self) -> Result<StageReport> {
        let categories = self.store.read(|storage| storage.load_categories()).await?;
        let ctx = self.unit_context();

        let report = self
            .pool(Stage::Subcategories)
            .run(categories, move |category| {
                let ctx = Arc::clone(&ctx);
                async move { unit::harvest_subcategories(&ctx, category).await }
            })
            .await;

        Ok(report)
    }

    /// Stage 3: one unit per stored subcategory
    async fn stage_listings(&self) -> Result<StageReport> {
        let subcategories = self
            .store
            .read(|storage| storage.load_subcategories())
            .await?;
        let ctx = self.unit_context();

        let report = self
            .pool(Stage::Listings)
            .run(subcategories, move |subcategory| {
                let ctx = Arc::clone(&ctx);
                async move { unit::harvest_listings(&ctx, subcategory).await }
            })
            .await;

        Ok(report)
    }

    /// Stage 4: one unit per batch of stored listings without an item yet
    async fn stage_items(&self) -> Result<StageReport> {
        let listings = self
            .store
            .read(|storage| storage.load_pending_listings())
            .await?;
        info!(pending = listings.len(), "Listings awaiting item details");
        let batches = unit::item_batches(listings, self.config.crawler.item_batch_size as usize);
        let ctx = self.unit_context();

        let report = self
            .pool(Stage::ItemDetails)
            .run(batches, move |batch| {
                let ctx = Arc::clone(&ctx);
                async move { unit::harvest_items(&ctx, batch).await }
            })
            .await;

        Ok(report)
    }

    /// Consolidates the unit files of `stage`'s dispatched units, backfilled
    /// from the store
    async fn merge(&self, stage: Stage, report: &StageReport) -> Result<MergeSummary> {
        let slugs: Vec<String> = report
            .unit_labels()
            .iter()
            .map(|label| unit_slug(label))
            .collect();

        let merged = match stage {
            Stage::ItemDetails => {
                let stored = self
                    .store
                    .read(|storage| storage.load_item_details())
                    .await?;
                let dir = self.workspace.item_units_dir();
                let output = self.workspace.merged_items_path();
                tokio::task::spawn_blocking(move || {
                    merge_unit_files::<ItemDetail>(&dir, &slugs, stored, &output)
                })
                .await
            }
            _ => {
                let stored = self.store.read(|storage| storage.load_listings()).await?;
                let dir = self.workspace.listing_units_dir();
                let output = self.workspace.merged_listings_path();
                tokio::task::spawn_blocking(move || {
                    merge_unit_files::<ListingRef>(&dir, &slugs, stored, &output)
                })
                .await
            }
        };

        merged.map_err(|e| HarvestError::Internal(format!("merge task failed: {}", e)))?
    }
}

/// Starts `egress`, runs `work` with its proxy endpoint, and always stops it
///
/// A panic inside `work` is turned into an error after the egress has been
/// stopped.
async fn with_egress<E, T, W, Fut>(egress: &mut E, work: W) -> Result<T>
where
    E: Egress + ?Sized,
    W: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Err(err) = egress.start().await {
        egress.stop().await;
        return Err(HarvestError::EgressStartup(err.to_string()));
    }

    let proxy = egress.proxy_endpoint();
    let outcome = AssertUnwindSafe(work(proxy)).catch_unwind().await;

    egress.stop().await;

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(HarvestError::Internal(format!(
            "pipeline panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn storage_settings(config: &Config) -> (PathBuf, Duration) {
    (
        PathBuf::from(&config.storage.output_dir),
        Duration::from_millis(config.storage.busy_timeout_ms),
    )
}

/// Runs every stage in a fresh run workspace
///
/// Returns true when the run reached `Done`. Never panics or returns an
/// error past this boundary; details are logged.
pub async fn run_full_pipeline<E, F, P>(
    config: Config,
    egress: &mut E,
    fetcher: Arc<F>,
    parser: Arc<P>,
) -> bool
where
    E: Egress + ?Sized,
    F: Fetcher + 'static,
    P: CatalogParser + 'static,
{
    let (base, busy_timeout) = storage_settings(&config);

    let result = with_egress(egress, |proxy| async move {
        let workspace = RunWorkspace::create(&base, busy_timeout)?;
        let mut harvester = Harvester::new(config, workspace, fetcher, parser, proxy);
        harvester.run_all().await
    })
    .await;

    match result {
        Ok(()) => true,
        Err(err) => {
            error!(kind = ?err.kind(), error = %err, "Pipeline did not complete");
            false
        }
    }
}

/// Runs one stage, against an existing run when `run_id` is given
///
/// Stage 1 creates a fresh run when no id is given; later stages require one.
/// Returns true when the stage finished and the run holds at least one entity
/// of the stage's kind.
pub async fn run_stage_only<E, F, P>(
    config: Config,
    stage: Stage,
    run_id: Option<&str>,
    egress: &mut E,
    fetcher: Arc<F>,
    parser: Arc<P>,
) -> bool
where
    E: Egress + ?Sized,
    F: Fetcher + 'static,
    P: CatalogParser + 'static,
{
    let (base, busy_timeout) = storage_settings(&config);

    let workspace = match (stage, run_id) {
        (_, Some(id)) => RunId::parse(id).and_then(|id| RunWorkspace::open(&base, &id)),
        (Stage::Categories, None) => RunWorkspace::create(&base, busy_timeout),
        (_, None) => Err(HarvestError::Workspace(format!(
            "stage {} needs an existing run id",
            stage.number()
        ))),
    };

    let workspace = match workspace {
        Ok(workspace) => workspace,
        Err(err) => {
            error!(%stage, error = %err, "Cannot prepare run workspace");
            return false;
        }
    };

    let result = with_egress(egress, |proxy| async move {
        let mut harvester = Harvester::new(config, workspace, fetcher, parser, proxy);
        harvester.run_stage(stage).await
    })
    .await;

    match result {
        Ok(stored) => {
            info!(%stage, stored, "Stage finished");
            stored > 0
        }
        Err(err) => {
            error!(%stage, kind = ?err.kind(), error = %err, "Stage did not complete");
            false
        }
    }
}
