//! Daemon process lifecycle.

use crate::process;
use async_trait::async_trait;
use killpoint_core::{CoreError, CoreResult, DaemonName};
use std::time::Duration;

/// Starts and stops daemon processes
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Trigger a restart of the daemon. Returns once the restart is requested;
    /// completion is only observable through the topology.
    ///
    /// # Errors
    ///
    /// Returns error if the restart could not be requested
    async fn restart(&self, daemon: &DaemonName) -> CoreResult<()>;

    /// Whether the daemon process is running, if the backend can tell
    ///
    /// # Errors
    ///
    /// Returns error if the backend could not be queried
    async fn is_alive(&self, _daemon: &DaemonName) -> CoreResult<Option<bool>> {
        Ok(None)
    }
}

/// Lifecycle through systemd units, one per daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemdLifecycle {
    /// Unit name with `{name}` standing for the daemon name
    unit_template: String,
    command_timeout: Duration,
}

impl SystemdLifecycle {
    /// Create with the stock `ceph-mds@{name}` unit template
    #[must_use]
    pub fn new() -> Self {
        Self {
            unit_template: "ceph-mds@{name}".to_string(),
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Set the unit template
    #[must_use]
    pub fn with_unit_template(mut self, template: impl Into<String>) -> Self {
        self.unit_template = template.into();
        self
    }

    /// Unit name for a daemon
    #[must_use]
    pub fn unit(&self, daemon: &DaemonName) -> String {
        self.unit_template.replace("{name}", daemon.as_str())
    }

    async fn systemctl(&self, verb: &str, daemon: &DaemonName) -> CoreResult<process::ProcessOutput> {
        let args = vec!["--no-block".to_string(), verb.to_string(), self.unit(daemon)];
        process::run("systemctl", &args, self.command_timeout)
            .await
            .map_err(|e| CoreError::Io {
                path: self.unit(daemon),
                message: e.to_string(),
            })
    }
}

impl Default for SystemdLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeLifecycle for SystemdLifecycle {
    async fn restart(&self, daemon: &DaemonName) -> CoreResult<()> {
        let output = self.systemctl("restart", daemon).await?;
        if output.success {
            tracing::info!(daemon = %daemon, unit = %self.unit(daemon), "restart requested");
            Ok(())
        } else {
            Err(CoreError::CommandRejected {
                command: format!("systemctl restart {}", self.unit(daemon)),
                reason: output.reason(),
            })
        }
    }

    async fn is_alive(&self, daemon: &DaemonName) -> CoreResult<Option<bool>> {
        let output = self.systemctl("is-active", daemon).await?;
        Ok(Some(output.success))
    }
}
