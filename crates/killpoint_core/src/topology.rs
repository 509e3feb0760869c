//! Cluster role assignment as observed from the monitor.
//!
//! A [`ClusterTopology`] is an immutable snapshot. The harness never mutates
//! it; the cluster changes underneath and a fresh snapshot is taken per query.

use crate::{CoreError, CoreResult, DaemonName, Rank};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Daemon state as reported by the monitor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaemonState {
    /// `up:active` - serving its rank
    Active,
    /// `up:standby` - waiting to take over a rank
    Standby,
    /// Any other `up:*` state (replay, rejoin, reconnect, resolve, ...)
    Transitional(String),
}

impl DaemonState {
    /// Parse a monitor state string
    #[must_use]
    pub fn parse(state: &str) -> Self {
        match state {
            "up:active" => Self::Active,
            "up:standby" => Self::Standby,
            other => Self::Transitional(other.to_string()),
        }
    }

    /// Monitor state string
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "up:active",
            Self::Standby => "up:standby",
            Self::Transitional(s) => s,
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daemon in a topology snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Daemon name
    pub name: DaemonName,
    /// Rank held, if any
    pub rank: Option<Rank>,
    /// Reported state
    pub state: DaemonState,
}

impl DaemonInfo {
    /// An active daemon holding `rank`
    #[must_use]
    pub fn active(name: impl Into<DaemonName>, rank: u32) -> Self {
        Self {
            name: name.into(),
            rank: Some(Rank::new(rank)),
            state: DaemonState::Active,
        }
    }

    /// A standby daemon
    #[must_use]
    pub fn standby(name: impl Into<DaemonName>) -> Self {
        Self {
            name: name.into(),
            rank: None,
            state: DaemonState::Standby,
        }
    }

    /// A daemon holding `rank` in a non-active state
    #[must_use]
    pub fn transitional(name: impl Into<DaemonName>, rank: u32, state: &str) -> Self {
        Self {
            name: name.into(),
            rank: Some(Rank::new(rank)),
            state: DaemonState::parse(state),
        }
    }

    /// Whether the daemon is `up:active`
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == DaemonState::Active && self.rank.is_some()
    }

    /// Whether the daemon is `up:standby`
    #[must_use]
    pub fn is_standby(&self) -> bool {
        self.state == DaemonState::Standby
    }
}

/// Count summary of a topology, compared against the healthy target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyShape {
    /// Distinct ranks held by any daemon
    pub ranks: usize,
    /// `up:active` daemons
    pub active: usize,
    /// `up:standby` daemons
    pub standby: usize,
}

impl TopologyShape {
    /// Healthy shape for a cluster with `active_slots` ranks and `standby` spares
    #[must_use]
    pub const fn healthy(active_slots: usize, standby: usize) -> Self {
        Self {
            ranks: active_slots,
            active: active_slots,
            standby,
        }
    }
}

impl std::fmt::Display for TopologyShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ranks={} active={} standby={}",
            self.ranks, self.active, self.standby
        )
    }
}

/// Snapshot of role assignment across the metadata cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    daemons: Vec<DaemonInfo>,
}

impl ClusterTopology {
    /// Create a snapshot from daemon records
    #[must_use]
    pub fn new(daemons: Vec<DaemonInfo>) -> Self {
        Self { daemons }
    }

    /// All daemon records
    #[must_use]
    pub fn daemons(&self) -> &[DaemonInfo] {
        &self.daemons
    }

    /// Look up a daemon by name
    #[must_use]
    pub fn find(&self, name: &DaemonName) -> Option<&DaemonInfo> {
        self.daemons.iter().find(|d| &d.name == name)
    }

    /// Active daemon names in rank order
    #[must_use]
    pub fn active_names(&self) -> Vec<DaemonName> {
        let mut active: Vec<&DaemonInfo> = self.daemons.iter().filter(|d| d.is_active()).collect();
        active.sort_by_key(|d| d.rank);
        active.into_iter().map(|d| d.name.clone()).collect()
    }

    /// Active daemon holding the lowest rank
    #[must_use]
    pub fn leading_active(&self) -> Option<DaemonName> {
        self.active_names().into_iter().next()
    }

    /// Standby daemon names
    #[must_use]
    pub fn standby_names(&self) -> BTreeSet<DaemonName> {
        self.daemons
            .iter()
            .filter(|d| d.is_standby())
            .map(|d| d.name.clone())
            .collect()
    }

    /// Ranks held by any daemon, whatever its state
    #[must_use]
    pub fn ranks(&self) -> BTreeSet<Rank> {
        self.daemons.iter().filter_map(|d| d.rank).collect()
    }

    /// Count summary
    #[must_use]
    pub fn shape(&self) -> TopologyShape {
        TopologyShape {
            ranks: self.ranks().len(),
            active: self.daemons.iter().filter(|d| d.is_active()).count(),
            standby: self.daemons.iter().filter(|d| d.is_standby()).count(),
        }
    }

    /// Every ranked daemon is active and exactly `active_slots` are serving
    #[must_use]
    pub fn is_steady(&self, active_slots: usize) -> bool {
        let ranked_all_active = self
            .daemons
            .iter()
            .filter(|d| d.rank.is_some())
            .all(DaemonInfo::is_active);
        ranked_all_active && self.shape().active == active_slots
    }

    /// Check structural invariants: ranks are unique, standbys hold no rank
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopology` naming the first violation
    pub fn validate(&self) -> CoreResult<()> {
        let mut seen = BTreeSet::new();
        for daemon in &self.daemons {
            if let Some(rank) = daemon.rank {
                if daemon.is_standby() {
                    return Err(CoreError::InvalidTopology {
                        reason: format!("standby {} holds rank {}", daemon.name, rank),
                    });
                }
                if !seen.insert(rank) {
                    return Err(CoreError::InvalidTopology {
                        reason: format!("rank {} held by more than one daemon", rank),
                    });
                }
            }
        }
        Ok(())
    }
}
