//! Arming a kill point and triggering the monitored operation.

use killpoint_cluster::{AdminCommand, ClusterAdmin, CommandError};
use killpoint_core::{Checkpoint, CoreError, DaemonName, HarnessConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to the monitored operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The operation failed or lost its connection, as a crash would cause
    Interrupted(String),
    /// The daemon answered normally. Promotion polling still decides whether
    /// the checkpoint passes.
    Completed,
}

/// Injection failures that fail the iteration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    /// The daemon refused the kill point value
    #[error("{daemon} refused kill point {checkpoint}: {source}")]
    CheckpointRejected {
        /// Target daemon
        daemon: DaemonName,
        /// Kill point
        checkpoint: Checkpoint,
        /// Cluster error
        source: CoreError,
    },

    /// The operation could not be issued at all
    #[error("monitored operation could not be issued: {0}")]
    Unexpected(String),
}

/// Sets the kill point config on a daemon, then runs the export it guards
pub struct FaultInjector {
    admin: Arc<dyn ClusterAdmin>,
    kill_key: String,
    command: AdminCommand,
}

impl FaultInjector {
    /// Create an injector using the kill key and export from `config`
    #[must_use]
    pub fn new(admin: Arc<dyn ClusterAdmin>, config: &HarnessConfig) -> Self {
        Self {
            admin,
            kill_key: config.kill_config_key.clone(),
            command: AdminCommand::export_dir(&config.export_path, config.export_target()),
        }
    }

    /// Monitored operation issued after arming
    #[must_use]
    pub fn command(&self) -> &AdminCommand {
        &self.command
    }

    /// Arm `checkpoint` on `daemon` and issue the monitored operation.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointRejected` if the config write fails and `Unexpected`
    /// if the admin tool cannot be launched. A failed or cut-off operation is
    /// the expected result and comes back as [`InjectionOutcome::Interrupted`].
    pub async fn inject(
        &self,
        daemon: &DaemonName,
        checkpoint: Checkpoint,
    ) -> Result<InjectionOutcome, InjectError> {
        self.admin
            .set_config(daemon, &self.kill_key, &checkpoint.to_string())
            .await
            .map_err(|source| InjectError::CheckpointRejected {
                daemon: daemon.clone(),
                checkpoint,
                source,
            })?;
        debug!(%daemon, %checkpoint, key = %self.kill_key, "kill point armed");

        match self.admin.issue_command(daemon, &self.command).await {
            Ok(_) => {
                warn!(%daemon, %checkpoint, command = %self.command, "operation completed, daemon expected to crash");
                Ok(InjectionOutcome::Completed)
            }
            Err(CommandError::Launch(reason)) => Err(InjectError::Unexpected(reason)),
            Err(err) => {
                info!(%daemon, %checkpoint, error = %err, "operation interrupted");
                Ok(InjectionOutcome::Interrupted(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use killpoint_cluster::CommandOutput;
    use killpoint_core::CoreResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        reject_config: bool,
        reply: Option<Result<CommandOutput, CommandError>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClusterAdmin for Scripted {
        async fn set_config(&self, daemon: &DaemonName, key: &str, value: &str) -> CoreResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set {} {}={}", daemon, key, value));
            if self.reject_config {
                return Err(CoreError::CommandRejected {
                    command: key.to_string(),
                    reason: "EINVAL".to_string(),
                });
            }
            Ok(())
        }

        async fn issue_command(
            &self,
            daemon: &DaemonName,
            command: &AdminCommand,
        ) -> Result<CommandOutput, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tell {} {}", daemon, command));
            self.reply.clone().unwrap_or_else(|| Ok(CommandOutput::default()))
        }

        async fn get_config(&self, _: &str, _: &str) -> CoreResult<String> {
            Ok("15".to_string())
        }

        async fn request_active_slots(&self, _: usize) -> CoreResult<()> {
            Ok(())
        }
    }

    fn injector(admin: Scripted) -> (Arc<Scripted>, FaultInjector) {
        let admin = Arc::new(admin);
        let injector = FaultInjector::new(admin.clone(), &HarnessConfig::default());
        (admin, injector)
    }

    #[tokio::test]
    async fn test_interrupted_operation_is_expected() {
        let (admin, injector) = injector(Scripted {
            reply: Some(Err(CommandError::Interrupted {
                daemon: DaemonName::new("a"),
                reason: "connection reset by peer".to_string(),
            })),
            ..Default::default()
        });

        let outcome = injector
            .inject(&DaemonName::new("a"), Checkpoint::new(5))
            .await
            .unwrap();
        assert!(matches!(outcome, InjectionOutcome::Interrupted(_)));
        assert_eq!(
            *admin.calls.lock().unwrap(),
            vec![
                "set a mds_kill_export_at=5".to_string(),
                "tell a export dir /abc 1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_operation_is_expected() {
        let (_, injector) = injector(Scripted {
            reply: Some(Err(CommandError::Rejected {
                daemon: DaemonName::new("a"),
                command: "export dir /abc 1".to_string(),
                reason: "EIO".to_string(),
            })),
            ..Default::default()
        });
        let outcome = injector.inject(&DaemonName::new("a"), Checkpoint::new(1)).await;
        assert!(matches!(outcome, Ok(InjectionOutcome::Interrupted(_))));
    }

    #[tokio::test]
    async fn test_completed_operation() {
        let (_, injector) = injector(Scripted::default());
        let outcome = injector.inject(&DaemonName::new("a"), Checkpoint::new(1)).await;
        assert_eq!(outcome, Ok(InjectionOutcome::Completed));
    }

    #[tokio::test]
    async fn test_config_rejection_skips_operation() {
        let (admin, injector) = injector(Scripted {
            reject_config: true,
            ..Default::default()
        });
        let err = injector
            .inject(&DaemonName::new("a"), Checkpoint::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, InjectError::CheckpointRejected { .. }));
        assert_eq!(admin.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_unexpected() {
        let (_, injector) = injector(Scripted {
            reply: Some(Err(CommandError::Launch("ceph: not found".to_string()))),
            ..Default::default()
        });
        let err = injector
            .inject(&DaemonName::new("a"), Checkpoint::new(2))
            .await
            .unwrap_err();
        assert_eq!(err, InjectError::Unexpected("ceph: not found".to_string()));
    }
}
