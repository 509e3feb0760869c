//! Faults the simulated cluster can be told to exhibit at a given kill point.
//!
//! The healthy simulation always fails over cleanly. A [`FaultPlan`] breaks
//! that on purpose so each harness failure path can be exercised.

use killpoint_core::Checkpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Misbehaviour injected when a kill point is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimFault {
    /// The monitor never hands the dead daemon's rank to a standby
    NoPromotion,
    /// The fixture directory disappears during failover
    LoseFixture,
    /// The killed daemon never comes back after a restart
    NoRejoin,
    /// The daemon refuses the kill point config value
    RejectCheckpoint,
    /// The kill point never fires and the export completes
    SurviveCheckpoint,
}

impl SimFault {
    /// Name used on the command line
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoPromotion => "no-promotion",
            Self::LoseFixture => "lose-fixture",
            Self::NoRejoin => "no-rejoin",
            Self::RejectCheckpoint => "reject-checkpoint",
            Self::SurviveCheckpoint => "survive",
        }
    }
}

impl FromStr for SimFault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-promotion" => Ok(Self::NoPromotion),
            "lose-fixture" => Ok(Self::LoseFixture),
            "no-rejoin" => Ok(Self::NoRejoin),
            "reject-checkpoint" => Ok(Self::RejectCheckpoint),
            "survive" => Ok(Self::SurviveCheckpoint),
            other => Err(format!("unknown fault {:?}", other)),
        }
    }
}

/// A fault bound to the kill point it fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledFault {
    /// Kill point that triggers the fault
    pub checkpoint: Checkpoint,
    /// What goes wrong
    pub fault: SimFault,
}

impl FromStr for ScheduledFault {
    type Err = String;

    /// Parse `<fault>@<checkpoint>`, e.g. `no-rejoin@4`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fault, checkpoint) = s
            .split_once('@')
            .ok_or_else(|| format!("expected <fault>@<checkpoint>, got {:?}", s))?;
        let checkpoint: u32 = checkpoint
            .parse()
            .map_err(|_| format!("bad checkpoint in {:?}", s))?;
        if checkpoint == 0 {
            return Err("checkpoints start at 1".to_string());
        }
        Ok(Self {
            checkpoint: Checkpoint::new(checkpoint),
            fault: fault.parse()?,
        })
    }
}

/// Faults keyed by kill point
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    faults: BTreeMap<Checkpoint, Vec<SimFault>>,
}

impl FaultPlan {
    /// Create an empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fault at a kill point
    #[must_use]
    pub fn with_fault(mut self, checkpoint: Checkpoint, fault: SimFault) -> Self {
        self.faults.entry(checkpoint).or_default().push(fault);
        self
    }

    /// Build from parsed `fault@k` entries
    #[must_use]
    pub fn from_scheduled(scheduled: impl IntoIterator<Item = ScheduledFault>) -> Self {
        scheduled
            .into_iter()
            .fold(Self::new(), |plan, s| plan.with_fault(s.checkpoint, s.fault))
    }

    /// Whether `fault` is planned at `checkpoint`
    #[must_use]
    pub fn has(&self, checkpoint: Checkpoint, fault: SimFault) -> bool {
        self.faults
            .get(&checkpoint)
            .is_some_and(|f| f.contains(&fault))
    }

    /// Kill points with at least one fault, ascending
    #[must_use]
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.faults.keys().copied().collect()
    }

    /// Whether the plan is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}
