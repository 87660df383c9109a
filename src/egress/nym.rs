//! Nym SOCKS5 client manager

use super::process::EgressProcess;
use super::{Egress, EgressError, EgressState};
use crate::config::EgressConfig;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Manages a locally spawned `nym-socks5-client`
///
/// When a service provider is configured, the client identity is initialized
/// once before the first run. An `init` that fails (typically because the
/// identity already exists) is logged and the run goes ahead. The `args` of
/// the egress config are not used; the client is always started with
/// `run --id <client-id>`.
pub struct NymEgress {
    config: EgressConfig,
    state: EgressState,
    process: EgressProcess,
    initialized: bool,
}

impl NymEgress {
    pub fn new(config: EgressConfig) -> Self {
        Self {
            config,
            state: EgressState::Stopped,
            process: EgressProcess::default(),
            initialized: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    fn init_args(&self, provider: &str) -> Vec<String> {
        let nym = &self.config.nym;
        vec![
            "init".to_string(),
            "--id".to_string(),
            nym.client_id.clone(),
            "--use-reply-surbs".to_string(),
            nym.use_reply_surbs.to_string(),
            "--provider".to_string(),
            provider.to_string(),
            "--port".to_string(),
            self.config.socks_port.to_string(),
            "--latency-based-selection".to_string(),
        ]
    }

    fn run_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--id".to_string(),
            self.config.nym.client_id.clone(),
        ]
    }

    async fn initialize(&mut self) {
        let Some(provider) = self.config.nym.provider.clone() else {
            return;
        };

        info!(client = %self.config.nym.client_id, "Initializing Nym client");
        let output = Command::new(&self.config.binary)
            .args(self.init_args(&provider))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => info!("Nym client initialized"),
            Ok(output) => warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Nym client initialization failed"
            ),
            Err(err) => warn!(error = %err, "Nym client initialization could not run"),
        }
        self.initialized = true;
    }
}

#[async_trait]
impl Egress for NymEgress {
    async fn start(&mut self) -> Result<(), EgressError> {
        if self.state == EgressState::Running {
            debug!("Egress already running");
            return Ok(());
        }

        self.state = EgressState::Starting;
        if !self.initialized {
            self.initialize().await;
        }

        info!(binary = %self.config.binary, client = %self.config.nym.client_id, "Starting egress");
        let args = self.run_args();
        if let Err(err) = self.process.launch(&self.config, &args).await {
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
