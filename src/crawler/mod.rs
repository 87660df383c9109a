//! Crawler module for phased catalog harvesting
//!
//! This module contains the core harvesting logic, including:
//! - Per-attempt browsing sessions and the retrying fetch client
//! - Selector-driven parsing of category, listing and item pages
//! - The bounded worker pool that runs a stage's units
//! - Overall stage coordination and the run entry points

mod coordinator;
mod fetcher;
mod parser;
mod pool;
mod session;
mod unit;

pub use coordinator::{run_full_pipeline, run_stage_only, Harvester, Stage};
pub use fetcher::{
    AttemptError, FetchFailure, Fetcher, PageResponse, RetryingFetcher, Session, SessionProvider,
};
pub use parser::{CatalogParser, ParseError, SelectorParser};
pub use pool::{StageReport, UnitOutcome, UnitReport, WorkUnit, WorkerPool};
pub use session::{HttpSession, HttpSessionProvider};
pub use unit::{item_batches, ItemBatch};
