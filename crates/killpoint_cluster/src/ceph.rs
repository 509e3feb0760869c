//! Ceph command-line adapter.
//!
//! Talks to a live cluster through the `ceph` binary. Daemon commands go
//! through `ceph tell mds.<name>`, topology comes from `ceph fs dump`.

use crate::admin::{AdminCommand, ClusterAdmin, CommandError, CommandOutput};
use crate::process::{self, ProcessFailure, ProcessOutput};
use crate::view::TopologySource;
use async_trait::async_trait;
use killpoint_core::{ClusterTopology, CoreError, CoreResult, DaemonInfo, DaemonName, DaemonState, Rank};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// stderr fragments that mean the cluster could not be contacted at all
const UNREACHABLE_MARKERS: &[&str] = &[
    "timed out",
    "connection refused",
    "error connecting to the cluster",
    "monclient",
];

/// stderr fragments that mean the daemon parsed and refused the command
const REJECTED_MARKERS: &[&str] = &["einval", "invalid command", "unrecognized"];

/// Ceph CLI configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CephConfig {
    /// Path or name of the `ceph` binary
    pub binary: String,
    /// Filesystem under test
    pub fs_name: String,
    /// Upper bound for a single CLI invocation
    pub command_timeout: Duration,
}

impl CephConfig {
    /// Create a config for filesystem `fs_name`
    #[must_use]
    pub fn new(fs_name: impl Into<String>) -> Self {
        Self {
            binary: "ceph".to_string(),
            fs_name: fs_name.into(),
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Set the binary
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the per-command timeout
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Cluster admin and topology source backed by the `ceph` CLI
#[derive(Debug, Clone)]
pub struct CephCli {
    config: CephConfig,
}

impl CephCli {
    /// Create a new adapter
    #[must_use]
    pub fn new(config: CephConfig) -> Self {
        Self { config }
    }

    async fn ceph(&self, args: Vec<String>) -> Result<ProcessOutput, ProcessFailure> {
        process::run(&self.config.binary, &args, self.config.command_timeout).await
    }

    /// Run a cluster-level command that must succeed
    async fn checked(&self, args: Vec<String>) -> CoreResult<String> {
        let command = args.join(" ");
        let output = self.ceph(args).await.map_err(CoreError::unreachable)?;
        if output.success {
            return Ok(output.stdout);
        }
        let reason = output.reason();
        if is_unreachable(&reason) {
            Err(CoreError::ClusterUnreachable { reason })
        } else {
            Err(CoreError::CommandRejected { command, reason })
        }
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

fn is_unreachable(reason: &str) -> bool {
    contains_any(reason, UNREACHABLE_MARKERS)
}

fn tell_args(daemon: &DaemonName, words: &[String]) -> Vec<String> {
    let mut args = vec!["tell".to_string(), daemon.qualified()];
    args.extend(words.iter().cloned());
    args
}

#[async_trait]
impl ClusterAdmin for CephCli {
    async fn set_config(&self, daemon: &DaemonName, key: &str, value: &str) -> CoreResult<()> {
        let words = ["config", "set", key, value].map(String::from);
        self.checked(tell_args(daemon, &words)).await.map(|_| ())
    }

    async fn issue_command(
        &self,
        daemon: &DaemonName,
        command: &AdminCommand,
    ) -> Result<CommandOutput, CommandError> {
        let output = match self.ceph(tell_args(daemon, &command.args)).await {
            Ok(output) => output,
            Err(ProcessFailure::Launch(err)) => return Err(CommandError::Launch(err.to_string())),
            Err(failure @ ProcessFailure::TimedOut(_)) => {
                return Err(CommandError::Interrupted {
                    daemon: daemon.clone(),
                    reason: failure.to_string(),
                });
            }
        };

        if output.success {
            return Ok(CommandOutput {
                stdout: output.stdout,
            });
        }

        let reason = output.reason();
        if contains_any(&reason, REJECTED_MARKERS) {
            Err(CommandError::Rejected {
                daemon: daemon.clone(),
                command: command.to_string(),
                reason,
            })
        } else {
            Err(CommandError::Interrupted {
                daemon: daemon.clone(),
                reason,
            })
        }
    }

    async fn get_config(&self, key: &str, scope: &str) -> CoreResult<String> {
        let args = ["config", "get", scope, key].map(String::from).to_vec();
        Ok(self.checked(args).await?.trim().to_string())
    }

    async fn request_active_slots(&self, slots: usize) -> CoreResult<()> {
        let args = vec![
            "fs".to_string(),
            "set".to_string(),
            self.config.fs_name.clone(),
            "max_mds".to_string(),
            slots.to_string(),
        ];
        self.checked(args).await.map(|_| ())
    }
}

#[async_trait]
impl TopologySource for CephCli {
    async fn snapshot(&self) -> CoreResult<ClusterTopology> {
        let args = ["fs", "dump", "--format=json"].map(String::from).to_vec();
        let json = self.checked(args).await?;
        parse_fs_dump(&json, &self.config.fs_name)
    }
}

#[derive(Debug, Deserialize)]
struct FsDump {
    #[serde(default)]
    standbys: Vec<MdsEntry>,
    #[serde(default)]
    filesystems: Vec<FsEntry>,
}

#[derive(Debug, Deserialize)]
struct FsEntry {
    mdsmap: MdsMap,
}

#[derive(Debug, Deserialize)]
struct MdsMap {
    fs_name: String,
    #[serde(default)]
    info: BTreeMap<String, MdsEntry>,
}

#[derive(Debug, Deserialize)]
struct MdsEntry {
    name: String,
    rank: i64,
    state: String,
}

impl MdsEntry {
    fn into_daemon(self) -> DaemonInfo {
        // standby-replay daemons follow a rank without holding it
        let rank = if self.rank >= 0 && self.state != "up:standby-replay" {
            u32::try_from(self.rank).ok().map(Rank::new)
        } else {
            None
        };
        DaemonInfo {
            name: DaemonName::new(self.name),
            rank,
            state: DaemonState::parse(&self.state),
        }
    }
}

/// Build a topology for `fs_name` from `ceph fs dump --format=json` output
///
/// # Errors
///
/// Returns `Parse` for malformed JSON, `InvalidTopology` if the filesystem
/// is not in the dump
pub fn parse_fs_dump(json: &str, fs_name: &str) -> CoreResult<ClusterTopology> {
    let dump: FsDump = serde_json::from_str(json)?;
    let fs = dump
        .filesystems
        .into_iter()
        .find(|f| f.mdsmap.fs_name == fs_name)
        .ok_or_else(|| CoreError::InvalidTopology {
            reason: format!("filesystem {} not found in fs dump", fs_name),
        })?;

    let daemons = fs
        .mdsmap
        .info
        .into_values()
        .chain(dump.standbys)
        .map(MdsEntry::into_daemon)
        .collect();
    Ok(ClusterTopology::new(daemons))
}
