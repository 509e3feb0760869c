//! Administrative access to the metadata cluster.

use async_trait::async_trait;
use killpoint_core::{CoreResult, DaemonName, Rank};
use serde::{Deserialize, Serialize};

/// Command sent to a single daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCommand {
    /// Command words as the daemon parses them
    pub args: Vec<String>,
}

impl AdminCommand {
    /// Create from command words
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    /// `export dir <path> <rank>` - migrate a subtree to another rank
    #[must_use]
    pub fn export_dir(path: &str, target: Rank) -> Self {
        Self::new(vec![
            "export".to_string(),
            "dir".to_string(),
            path.to_string(),
            target.to_string(),
        ])
    }

    /// If this is an export, the path and target rank
    #[must_use]
    pub fn as_export_dir(&self) -> Option<(&str, Rank)> {
        match self.args.as_slice() {
            [a, b, path, rank] if a == "export" && b == "dir" => {
                rank.parse().ok().map(|r| (path.as_str(), Rank::new(r)))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Reply from a daemon that completed a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Raw reply text
    pub stdout: String,
}

/// Failure of a command sent to a daemon
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The daemon went away while the command was in flight
    #[error("Connection to {daemon} lost: {reason}")]
    Interrupted {
        /// Target daemon
        daemon: DaemonName,
        /// What the transport reported
        reason: String,
    },

    /// The daemon answered with an error
    #[error("{daemon} rejected '{command}': {reason}")]
    Rejected {
        /// Target daemon
        daemon: DaemonName,
        /// Command as issued
        command: String,
        /// Error text
        reason: String,
    },

    /// The admin tool itself could not be started
    #[error("Could not launch admin tool: {0}")]
    Launch(String),
}

/// Administrative interface to the cluster
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Set a runtime config value on one daemon
    ///
    /// # Errors
    ///
    /// Returns `CommandRejected` if the daemon refuses the value,
    /// `ClusterUnreachable` if it cannot be contacted
    async fn set_config(&self, daemon: &DaemonName, key: &str, value: &str) -> CoreResult<()>;

    /// Send a command to one daemon
    ///
    /// # Errors
    ///
    /// Returns `CommandError` describing how the command failed
    async fn issue_command(
        &self,
        daemon: &DaemonName,
        command: &AdminCommand,
    ) -> Result<CommandOutput, CommandError>;

    /// Read a value from the central config store
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable or the key is unknown
    async fn get_config(&self, key: &str, scope: &str) -> CoreResult<String>;

    /// Ask the monitor for `slots` active ranks
    ///
    /// # Errors
    ///
    /// Returns error if the monitor refuses the change
    async fn request_active_slots(&self, slots: usize) -> CoreResult<()>;
}
