//! Tor process manager

use super::process::EgressProcess;
use super::{control, Egress, EgressError, EgressState};
use crate::config::{EgressConfig, EgressKind};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Manages a locally spawned Tor process
pub struct TorEgress {
    config: EgressConfig,
    state: EgressState,
    process: EgressProcess,
}

impl TorEgress {
    pub fn new(config: EgressConfig) -> Self {
        Self {
            config,
            state: EgressState::Stopped,
            process: EgressProcess::default(),
        }
    }

    /// OS process id of the running egress
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

/// Switches a running egress to a fresh exit circuit
///
/// This affects every fetch routed through the egress at once: requests in
/// flight may be cut or land on a different exit mid-page. The worker pool
/// never calls this; it is the operator path against an egress that is
/// already running.
pub async fn rotate_identity(config: &EgressConfig) -> Result<(), EgressError> {
    if config.kind != EgressKind::Tor {
        return Err(EgressError::Unsupported(format!(
            "identity rotation needs a Tor control port, egress kind is {}",
            config.kind
        )));
    }

    control::request_new_identity(
        &config.host,
        config.control_port,
        config.control_password.as_deref(),
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(config.identity_settle_ms)).await;
    info!("Egress identity rotated");
    Ok(())
}

#[async_trait]
impl Egress for TorEgress {
    async fn start(&mut self) -> Result<(), EgressError> {
        if self.state == EgressState::Running {
            debug!("Egress already running");
            return Ok(());
        }

        self.state = EgressState::Starting;
        info!(binary = %self.config.binary, "Starting egress");

        if let Err(err) = self.process.launch(&self.config, &self.config.args).await {
            self.state = EgressState::Stopped;
            warn!(binary = %self.config.binary, error = %err, "Egress failed to start");
            return Err(err);
        }

        self.state = EgressState::Running;
        info!(pid = ?self.pid(), proxy = %self.proxy_endpoint(), "Egress running");
        Ok(())
    }

    async fn stop(&mut self) {
        self.process.terminate().await;
        self.state = EgressState::Stopped;
    }

    fn proxy_endpoint(&self) -> String {
        self.config.proxy_endpoint()
    }

    fn state(&self) -> EgressState {
        self.state
    }
}
