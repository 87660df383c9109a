//! Spawned egress process shared by the Tor and Nym managers

use super::EgressError;
use crate::config::EgressConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Child process handle behind an egress manager
///
/// The child is spawned with `kill_on_drop`, so a manager dropped without
/// `stop()` still takes the process down with it.
#[derive(Default)]
pub(super) struct EgressProcess {
    child: Option<Child>,
}

impl EgressProcess {
    pub(super) fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    /// Spawns `config.binary` with `args` and waits until it looks usable
    ///
    /// On any failure the child is killed before the error is returned.
    pub(super) async fn launch(
        &mut self,
        config: &EgressConfig,
        args: &[String],
    ) -> Result<(), EgressError> {
        let spawned = Command::new(&config.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => self.child = Some(child),
            Err(source) => {
                let binary = config.binary.clone();
                return Err(EgressError::Spawn { binary, source });
            }
        }

        tokio::time::sleep(Duration::from_millis(config.health_wait_ms)).await;

        let exited = match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(Some(status))) => Some(EgressError::Exited(status.to_string())),
            Some(Err(err)) => Some(EgressError::Io(err)),
            _ => None,
        };
        if let Some(err) = exited {
            self.kill().await;
            return Err(err);
        }

        if config.check_socks {
            let address = (config.host.as_str(), config.socks_port);
            let reachable = matches!(
                tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await,
                Ok(Ok(_))
            );
            if !reachable {
                self.kill().await;
                let endpoint = format!("{}:{}", config.host, config.socks_port);
                return Err(EgressError::Unreachable(endpoint));
            }
        }

        Ok(())
    }

    /// Kills the child, logging the outcome; a no-op when nothing runs
    pub(super) async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            match child.kill().await {
                Ok(()) => info!(pid = ?pid, "Egress stopped"),
                Err(err) => warn!(pid = ?pid, error = %err, "Failed to kill egress process"),
            }
        }
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}
