//! Catalog Harvester: a phased catalog crawler behind an anonymizing egress
//!
//! This crate harvests a category → subcategory → listing → item-detail
//! hierarchy from a bot-resistant site, routing every request through a shared
//! Tor egress and persisting deduplicated results into a per-run workspace.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod egress;
pub mod output;
pub mod state;
pub mod storage;
pub mod workspace;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] crawler::FetchFailure),

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Stage 1 produced no categories: {0}")]
    CriticalPhase(String),

    #[error("Egress failed to start: {0}")]
    EgressStartup(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::PipelineState,
        to: state::PipelineState,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure taxonomy every [`HarvestError`] maps onto
///
/// Only `CriticalPhase` and `EgressStartup` abort a run; the rest are absorbed
/// at the unit (or page) boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Fetch,
    Parse,
    Persistence,
    CriticalPhase,
    EgressStartup,
    Internal,
}

impl HarvestError {
    /// Classifies this error onto the failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(_) => FailureKind::Fetch,
            Self::Parse { .. } => FailureKind::Parse,
            Self::Storage(_) | Self::Database(_) | Self::Io(_) | Self::Json(_) => {
                FailureKind::Persistence
            }
            Self::CriticalPhase(_) => FailureKind::CriticalPhase,
            Self::EgressStartup(_) => FailureKind::EgressStartup,
            Self::Config(_)
            | Self::Workspace(_)
            | Self::InvalidTransition { .. }
            | Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Builds a parse error tagged with the URL of the offending page
    pub fn parse(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{Category, ItemDetail, ListingRef, Subcategory};
pub use config::Config;
pub use crawler::{run_full_pipeline, run_stage_only, Harvester, Stage};
pub use state::PipelineState;
