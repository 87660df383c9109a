//! Shared anonymizing egress
//!
//! Every fetch of a run is routed through one egress process. The orchestrator
//! owns it through the [`Egress`] trait: it starts the process before the
//! first fetch and stops it on every exit path.

mod control;
mod exit;
mod nym;
mod process;
mod tor;

pub use control::request_new_identity;
pub use exit::exit_address;
pub use nym::NymEgress;
pub use tor::{rotate_identity, TorEgress};

use crate::config::{EgressConfig, EgressKind};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of the egress process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for EgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Errors raised by the egress manager
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("Egress process exited during startup ({0})")]
    Exited(String),

    #[error("SOCKS endpoint {0} unreachable after health wait")]
    Unreachable(String),

    #[error("Control port error: {0}")]
    Control(String),

    #[error("Control command '{command}' rejected: {reply}")]
    Rejected { command: String, reply: String },

    #[error("Exit address check failed: {0}")]
    ExitCheck(String),

    #[error("Unsupported by this egress: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the manager for the configured egress kind
pub fn from_config(config: &EgressConfig) -> Box<dyn Egress> {
    match config.kind {
        EgressKind::Tor => Box::new(TorEgress::new(config.clone())),
        EgressKind::Nym => Box::new(NymEgress::new(config.clone())),
    }
}

/// Lifecycle contract of the shared egress
#[async_trait]
pub trait Egress: Send {
    /// Starts the egress and waits until it is usable
    ///
    /// A no-op when already running. On failure the egress is left stopped.
    async fn start(&mut self) -> Result<(), EgressError>;

    /// Terminates the egress process; safe to call in any state
    async fn stop(&mut self);

    /// Proxy URL fetches are routed through
    fn proxy_endpoint(&self) -> String;

    fn state(&self) -> EgressState;
}
