//! In-memory metadata cluster implementing every collaborator interface.
//!
//! State is evaluated lazily against `tokio::time::Instant`: each call first
//! applies every transition that is due, then answers. Under a paused tokio
//! clock a full failover takes no wall time.

use crate::daemon::{DaemonEvent, SimDaemon, SimDaemonState};
use crate::failure::{FaultPlan, SimFault};
use crate::record::SimRecord;
use crate::seed::SimSeed;
use async_trait::async_trait;
use killpoint_cluster::{
    AdminCommand, ClusterAdmin, CommandError, CommandOutput, MountClient, NodeLifecycle,
    TopologySource,
};
use killpoint_core::{Checkpoint, ClusterTopology, CoreError, CoreResult, DaemonName, Rank};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Simulated cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Seed for timing jitter
    pub seed: SimSeed,
    /// Daemon names, in the order they are handed ranks
    pub daemons: Vec<DaemonName>,
    /// Ranks active when the cluster is created
    pub initial_active: usize,
    /// Missed-beacon time before the monitor fails a rank
    pub beacon_grace: Duration,
    /// Time a standby spends in replay before turning active
    pub takeover_delay: Duration,
    /// Time a restarted daemon takes to register as standby
    pub restart_delay: Duration,
    /// Upper bound of random delay added to failure detection and restart
    pub max_jitter: Duration,
    /// Highest valid kill point in the export path
    pub kill_points: u32,
    /// Daemon config key that arms a kill point
    pub kill_config_key: String,
}

impl SimConfig {
    /// Three daemons `a`, `b`, `c`, one rank active
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            daemons: ["a", "b", "c"].into_iter().map(DaemonName::new).collect(),
            initial_active: 1,
            beacon_grace: Duration::from_secs(15),
            takeover_delay: Duration::from_secs(2),
            restart_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(500),
            kill_points: 13,
            kill_config_key: "mds_kill_export_at".to_string(),
        }
    }

    /// Set daemon names
    #[must_use]
    pub fn with_daemons(mut self, names: &[&str]) -> Self {
        self.daemons = names.iter().map(|n| DaemonName::new(*n)).collect();
        self
    }

    /// Set initial active rank count
    #[must_use]
    pub fn with_initial_active(mut self, count: usize) -> Self {
        self.initial_active = count;
        self
    }

    /// Set beacon grace
    #[must_use]
    pub fn with_beacon_grace(mut self, grace: Duration) -> Self {
        self.beacon_grace = grace;
        self
    }

    /// Set restart delay
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(SimSeed::default())
    }
}

/// Rank without a holder, waiting for a standby
#[derive(Debug, Clone, Copy)]
struct Orphan {
    rank: Rank,
    promote_at: Instant,
    phase: &'static str,
}

struct SimState {
    started: Instant,
    daemons: Vec<SimDaemon>,
    orphans: Vec<Orphan>,
    max_mds: usize,
    config_store: BTreeMap<(String, String), String>,
    mounted: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, u64>,
    fixture_writes: usize,
    last_kill: Option<(DaemonName, Checkpoint)>,
    record: SimRecord,
    rng: ChaCha8Rng,
}

fn top_component(path: &str) -> &str {
    path.trim_start_matches('/').split('/').next().unwrap_or_default()
}

impl SimState {
    fn log(&mut self, at: Instant, daemon: Option<&DaemonName>, event: impl Into<String>) {
        let at_ms = at.saturating_duration_since(self.started).as_millis() as u64;
        self.record.push(at_ms, daemon, event);
    }

    fn find(&self, name: &DaemonName) -> Option<usize> {
        self.daemons.iter().position(|d| d.name() == name)
    }

    fn jitter(&mut self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.gen_range(0..=max_ms))
    }

    /// Ranks attributed to some daemon or awaiting takeover
    fn held_ranks(&self) -> BTreeSet<Rank> {
        self.daemons
            .iter()
            .filter_map(|d| d.info().and_then(|i| i.rank))
            .chain(self.orphans.iter().map(|o| o.rank))
            .collect()
    }

    fn advance(&mut self, now: Instant, takeover: Duration) {
        loop {
            let mut changed = false;
            for i in 0..self.daemons.len() {
                let Some(event) = self.daemons[i].advance(now) else {
                    continue;
                };
                changed = true;
                let name = self.daemons[i].name().clone();
                match event {
                    DaemonEvent::Activated { rank } => {
                        self.log(now, Some(&name), format!("active on rank {}", rank));
                    }
                    DaemonEvent::Rejoined => {
                        self.log(now, Some(&name), "rejoined as standby");
                    }
                    DaemonEvent::RankFailed { rank, at, handover } => {
                        self.log(at, Some(&name), format!("rank {} failed", rank));
                        if handover {
                            self.orphans.push(Orphan {
                                rank,
                                promote_at: at,
                                phase: "up:replay",
                            });
                        }
                    }
                }
            }
            changed |= self.assign_orphans(now, takeover);
            if !changed {
                break;
            }
        }
    }

    fn assign_orphans(&mut self, now: Instant, takeover: Duration) -> bool {
        let mut pending = std::mem::take(&mut self.orphans);
        pending.sort_by_key(|o| o.rank);
        let mut changed = false;

        for orphan in pending {
            let standby = self
                .daemons
                .iter()
                .enumerate()
                .filter(|(_, d)| d.state() == SimDaemonState::Standby)
                .min_by(|(_, a), (_, b)| a.name().cmp(b.name()))
                .map(|(i, _)| i);

            match standby {
                Some(i) if orphan.promote_at <= now => {
                    self.daemons[i].promote(orphan.rank, orphan.phase, orphan.promote_at + takeover);
                    let name = self.daemons[i].name().clone();
                    self.log(
                        orphan.promote_at,
                        Some(&name),
                        format!("taking over rank {} ({})", orphan.rank, orphan.phase),
                    );
                    changed = true;
                }
                _ => self.orphans.push(orphan),
            }
        }
        changed
    }

    fn ensure_mounted(&self) -> CoreResult<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(CoreError::Io {
                path: "/".to_string(),
                message: "not mounted".to_string(),
            })
        }
    }

    fn drop_subtree(&mut self, path: &str) {
        let top = top_component(path).to_string();
        self.dirs.remove(&top);
        self.files.retain(|p, _| top_component(p) != top);
    }
}

/// Simulated metadata cluster
pub struct SimCluster {
    config: SimConfig,
    faults: FaultPlan,
    state: Mutex<SimState>,
}

impl SimCluster {
    /// Create a healthy cluster
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self::with_faults(config, FaultPlan::new())
    }

    /// Create a cluster that misbehaves according to `faults`
    #[must_use]
    pub fn with_faults(config: SimConfig, faults: FaultPlan) -> Self {
        let started = Instant::now();
        let mut daemons: Vec<SimDaemon> = config.daemons.iter().cloned().map(SimDaemon::new).collect();
        for (rank, daemon) in daemons.iter_mut().take(config.initial_active).enumerate() {
            daemon.promote(Rank::new(rank as u32), "up:creating", started);
        }

        let mut config_store = BTreeMap::new();
        config_store.insert(
            ("mon".to_string(), "mds_beacon_grace".to_string()),
            config.beacon_grace.as_secs_f64().to_string(),
        );

        let state = SimState {
            started,
            daemons,
            orphans: Vec::new(),
            max_mds: config.initial_active,
            config_store,
            mounted: false,
            dirs: BTreeSet::new(),
            files: BTreeMap::new(),
            fixture_writes: 0,
            last_kill: None,
            record: SimRecord::new(config.seed.clone()),
            rng: config.seed.derive("jitter").rng(),
        };

        Self {
            config,
            faults,
            state: Mutex::new(state),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state after applying every transition due now
    fn settled(&self) -> (MutexGuard<'_, SimState>, Instant) {
        let now = Instant::now();
        let mut state = self.lock();
        state.advance(now, self.config.takeover_delay);
        (state, now)
    }

    /// Snapshot of the event record
    #[must_use]
    pub fn record(&self) -> SimRecord {
        self.lock().record.clone()
    }

    /// Number of fixture files written so far
    #[must_use]
    pub fn fixture_writes(&self) -> usize {
        self.lock().fixture_writes
    }

    /// Current state of one daemon
    #[must_use]
    pub fn daemon_state(&self, name: &DaemonName) -> Option<SimDaemonState> {
        let (state, _) = self.settled();
        state.find(name).map(|i| state.daemons[i].state())
    }

    /// Requested active rank count
    #[must_use]
    pub fn max_mds(&self) -> usize {
        self.lock().max_mds
    }

    /// Override a config store value
    pub fn set_config_value(&self, scope: &str, key: &str, value: &str) {
        self.lock()
            .config_store
            .insert((scope.to_string(), key.to_string()), value.to_string());
    }

    fn crash_on_export(&self, daemon: &DaemonName) -> Option<Checkpoint> {
        let state = self.lock();
        let armed = state.find(daemon).and_then(|i| state.daemons[i].armed())?;
        let checkpoint = Checkpoint::new(armed);
        let fires = (1..=self.config.kill_points).contains(&armed)
            && !self.faults.has(checkpoint, SimFault::SurviveCheckpoint);
        fires.then_some(checkpoint)
    }
}

#[async_trait]
impl ClusterAdmin for SimCluster {
    async fn set_config(&self, daemon: &DaemonName, key: &str, value: &str) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        let idx = state
            .find(daemon)
            .filter(|&i| state.daemons[i].is_responsive())
            .ok_or_else(|| CoreError::unreachable(format!("{} is not running", daemon.qualified())))?;

        if key != self.config.kill_config_key {
            state.log(now, Some(daemon), format!("config set {} {}", key, value));
            return Ok(());
        }

        let rejected = |reason: &str| CoreError::CommandRejected {
            command: format!("config set {} {}", key, value),
            reason: reason.to_string(),
        };
        let checkpoint: u32 = value
            .parse()
            .map_err(|_| rejected("EINVAL: expected an integer"))?;
        if self
            .faults
            .has(Checkpoint::new(checkpoint), SimFault::RejectCheckpoint)
        {
            state.log(now, Some(daemon), format!("refused kill point {}", checkpoint));
            return Err(rejected("EPERM: kill point not permitted"));
        }

        state.daemons[idx].arm(checkpoint);
        state.log(now, Some(daemon), format!("armed kill point {}", checkpoint));
        Ok(())
    }

    async fn issue_command(
        &self,
        daemon: &DaemonName,
        command: &AdminCommand,
    ) -> Result<CommandOutput, CommandError> {
        let rejected = |reason: &str| CommandError::Rejected {
            daemon: daemon.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        };

        let kill = self.crash_on_export(daemon);
        let (mut state, now) = self.settled();
        let Some(idx) = state
            .find(daemon)
            .filter(|&i| state.daemons[i].is_responsive())
        else {
            return Err(CommandError::Interrupted {
                daemon: daemon.clone(),
                reason: "connection refused".to_string(),
            });
        };

        let Some((path, target)) = command.as_export_dir() else {
            return Err(rejected("invalid command"));
        };
        let own = match state.daemons[idx].state() {
            SimDaemonState::Active { rank } => rank,
            _ => return Err(rejected("EAGAIN: not active")),
        };
        let target_active = state
            .daemons
            .iter()
            .any(|d| d.state() == SimDaemonState::Active { rank: target });
        if target == own || !target_active {
            return Err(rejected("EINVAL: bad target rank"));
        }

        let Some(checkpoint) = kill else {
            state.log(now, Some(daemon), format!("exported {} to rank {}", path, target));
            return Ok(CommandOutput {
                stdout: "{}".to_string(),
            });
        };

        let jitter = state.jitter(self.config.max_jitter);
        let handover = !self.faults.has(checkpoint, SimFault::NoPromotion);
        state.daemons[idx].crash(now + self.config.beacon_grace + jitter, handover);
        state.last_kill = Some((daemon.clone(), checkpoint));
        state.log(
            now,
            Some(daemon),
            format!("crashed at kill point {} exporting {}", checkpoint, path),
        );
        if self.faults.has(checkpoint, SimFault::LoseFixture) {
            state.drop_subtree(path);
            state.log(now, None, format!("lost subtree {}", path));
        }

        Err(CommandError::Interrupted {
            daemon: daemon.clone(),
            reason: "connection reset by peer".to_string(),
        })
    }

    async fn get_config(&self, key: &str, scope: &str) -> CoreResult<String> {
        self.lock()
            .config_store
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::CommandRejected {
                command: format!("config get {} {}", scope, key),
                reason: "ENOENT: unrecognized key".to_string(),
            })
    }

    async fn request_active_slots(&self, slots: usize) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        state.max_mds = slots;

        let held = state.held_ranks();
        for rank in (0..slots).map(|r| Rank::new(r as u32)) {
            if !held.contains(&rank) {
                state.orphans.push(Orphan {
                    rank,
                    promote_at: now,
                    phase: "up:creating",
                });
            }
        }
        for daemon in state.daemons.iter_mut() {
            if daemon.rank().is_some_and(|r| r.as_u32() as usize >= slots) {
                daemon.demote();
            }
        }

        state.log(now, None, format!("max_mds set to {}", slots));
        state.advance(now, self.config.takeover_delay);
        Ok(())
    }
}

#[async_trait]
impl TopologySource for SimCluster {
    async fn snapshot(&self) -> CoreResult<ClusterTopology> {
        let (state, _) = self.settled();
        Ok(ClusterTopology::new(
            state.daemons.iter().filter_map(SimDaemon::info).collect(),
        ))
    }
}

#[async_trait]
impl MountClient for SimCluster {
    async fn mount(&self) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        state.mounted = true;
        state.log(now, None, "client mounted");
        Ok(())
    }

    async fn unmount(&self) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        state.mounted = false;
        state.log(now, None, "client unmounted");
        Ok(())
    }

    async fn list_top_level_entries(&self) -> CoreResult<BTreeSet<String>> {
        let (state, _) = self.settled();
        state.ensure_mounted()?;
        Ok(state
            .dirs
            .iter()
            .cloned()
            .chain(state.files.keys().map(|p| top_component(p).to_string()))
            .collect())
    }

    async fn make_dir(&self, path: &str) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        state.ensure_mounted()?;
        state.dirs.insert(top_component(path).to_string());
        state.log(now, None, format!("mkdir {}", path));
        Ok(())
    }

    async fn write_fixture(&self, path: &str, size_mb: u64) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        state.ensure_mounted()?;
        let path = path.trim_start_matches('/');
        if path.contains('/') && !state.dirs.contains(top_component(path)) {
            return Err(CoreError::Io {
                path: path.to_string(),
                message: "parent directory does not exist".to_string(),
            });
        }
        state.files.insert(path.to_string(), size_mb);
        state.fixture_writes += 1;
        state.log(now, None, format!("wrote {} ({} MB)", path, size_mb));
        Ok(())
    }
}

#[async_trait]
impl NodeLifecycle for SimCluster {
    async fn restart(&self, daemon: &DaemonName) -> CoreResult<()> {
        let (mut state, now) = self.settled();
        let idx = state.find(daemon).ok_or_else(|| CoreError::CommandRejected {
            command: format!("restart {}", daemon.qualified()),
            reason: "unknown daemon".to_string(),
        })?;

        let rejoin = match &state.last_kill {
            Some((victim, checkpoint)) if victim == daemon => {
                !self.faults.has(*checkpoint, SimFault::NoRejoin)
            }
            _ => true,
        };
        let until = if rejoin {
            let jitter = state.jitter(self.config.max_jitter);
            Some(now + self.config.restart_delay + jitter)
        } else {
            None
        };

        if let Some(rank) = state.daemons[idx].restart(until) {
            state.orphans.push(Orphan {
                rank,
                promote_at: now,
                phase: "up:replay",
            });
        }
        let event = if rejoin { "restart requested" } else { "restart requested, will not rejoin" };
        state.log(now, Some(daemon), event);
        state.advance(now, self.config.takeover_delay);
        Ok(())
    }

    async fn is_alive(&self, daemon: &DaemonName) -> CoreResult<Option<bool>> {
        let (state, _) = self.settled();
        Ok(state.find(daemon).map(|i| state.daemons[i].is_alive()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killpoint_core::TopologyShape;

    fn export() -> AdminCommand {
        AdminCommand::export_dir("/abc", Rank::new(1))
    }

    async fn two_active(cluster: &SimCluster) {
        cluster.request_active_slots(2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let topo = cluster.snapshot().await.unwrap();
        assert!(topo.is_steady(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_topology() {
        let cluster = SimCluster::new(SimConfig::default());
        let topo = cluster.snapshot().await.unwrap();
        assert_eq!(topo.shape(), TopologyShape::healthy(1, 2));
        assert_eq!(topo.leading_active(), Some(DaemonName::new("a")));
        assert_eq!(cluster.max_mds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_second_rank_creates_it() {
        let cluster = SimCluster::new(SimConfig::default());
        cluster.request_active_slots(2).await.unwrap();

        let topo = cluster.snapshot().await.unwrap();
        assert_eq!(topo.ranks().len(), 2);
        assert!(!topo.is_steady(2));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let topo = cluster.snapshot().await.unwrap();
        assert_eq!(topo.shape(), TopologyShape::healthy(2, 1));
        assert_eq!(
            topo.active_names(),
            vec![DaemonName::new("a"), DaemonName::new("b")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_point_failover_and_rejoin() {
        let cluster = SimCluster::new(SimConfig::default());
        two_active(&cluster).await;
        let a = DaemonName::new("a");

        cluster.set_config(&a, "mds_kill_export_at", "4").await.unwrap();
        let err = cluster.issue_command(&a, &export()).await.unwrap_err();
        assert!(matches!(err, CommandError::Interrupted { .. }));
        assert_eq!(cluster.is_alive(&a).await.unwrap(), Some(false));

        // monitor has not noticed yet
        assert_eq!(cluster.snapshot().await.unwrap().leading_active(), Some(a.clone()));

        tokio::time::sleep(Duration::from_secs(18)).await;
        let topo = cluster.snapshot().await.unwrap();
        assert_eq!(topo.leading_active(), Some(DaemonName::new("c")));
        assert_eq!(topo.shape(), TopologyShape { ranks: 2, active: 2, standby: 0 });

        cluster.restart(&a).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let topo = cluster.snapshot().await.unwrap();
        assert!(topo.standby_names().contains(&a));
        assert_eq!(topo.shape(), TopologyShape::healthy(2, 1));
        assert_eq!(cluster.record().count_prefixed("crashed at kill point 4"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_without_kill_point_completes() {
        let cluster = SimCluster::new(SimConfig::default());
        two_active(&cluster).await;
        let a = DaemonName::new("a");

        cluster.issue_command(&a, &export()).await.unwrap();
        cluster.set_config(&a, "mds_kill_export_at", "99").await.unwrap();
        cluster.issue_command(&a, &export()).await.unwrap();
        assert_eq!(cluster.is_alive(&a).await.unwrap(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_rejected_from_standby() {
        let cluster = SimCluster::new(SimConfig::default());
        two_active(&cluster).await;
        let err = cluster
            .issue_command(&DaemonName::new("c"), &export())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_checkpoint_fault() {
        let faults = FaultPlan::new().with_fault(Checkpoint::new(2), SimFault::RejectCheckpoint);
        let cluster = SimCluster::with_faults(SimConfig::default(), faults);
        let a = DaemonName::new("a");
        assert!(cluster.set_config(&a, "mds_kill_export_at", "1").await.is_ok());
        assert!(matches!(
            cluster.set_config(&a, "mds_kill_export_at", "2").await,
            Err(CoreError::CommandRejected { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_rejoin_fault() {
        let faults = FaultPlan::new().with_fault(Checkpoint::new(1), SimFault::NoRejoin);
        let cluster = SimCluster::with_faults(SimConfig::default(), faults);
        two_active(&cluster).await;
        let a = DaemonName::new("a");

        cluster.set_config(&a, "mds_kill_export_at", "1").await.unwrap();
        let _ = cluster.issue_command(&a, &export()).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        cluster.restart(&a).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(cluster.daemon_state(&a), Some(SimDaemonState::Gone));
        assert!(cluster.snapshot().await.unwrap().standby_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_namespace() {
        let cluster = SimCluster::new(SimConfig::default());
        assert!(cluster.list_top_level_entries().await.is_err());
        assert!(cluster.make_dir("abc").await.is_err());

        cluster.mount().await.unwrap();
        assert!(cluster.write_fixture("abc/abc_file", 8).await.is_err());
        cluster.make_dir("abc").await.unwrap();
        cluster.write_fixture("abc/abc_file", 8).await.unwrap();

        let entries = cluster.list_top_level_entries().await.unwrap();
        assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec!["abc".to_string()]);
        assert_eq!(cluster.fixture_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_in_config_store() {
        let cluster = SimCluster::new(SimConfig::default());
        assert_eq!(cluster.get_config("mds_beacon_grace", "mon").await.unwrap(), "15");
        assert!(cluster.get_config("nope", "mon").await.is_err());
        cluster.set_config_value("mon", "mds_beacon_grace", "5");
        assert_eq!(cluster.get_config("mds_beacon_grace", "mon").await.unwrap(), "5");
    }
}
