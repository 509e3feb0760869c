//! Per-checkpoint scenario stages, failures and results.

use crate::injector::InjectError;
use killpoint_core::{Checkpoint, CoreError, DaemonName, TopologyShape};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Stage of one checkpoint scenario, in execution order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStage {
    /// Nothing checked yet
    #[default]
    Init,
    /// Cluster had the baseline shape and a victim was chosen
    PreconditionsChecked,
    /// Kill point armed and monitored operation issued
    FaultInjected,
    /// A former standby became the leading active daemon
    PromotionObserved,
    /// Fixture still visible through the mount
    ConsistencyVerified,
    /// Victim rejoined and the baseline shape is back
    Reconciled,
    /// Result recorded
    Reported,
}

impl ScenarioStage {
    /// Stage name as logged
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PreconditionsChecked => "preconditions_checked",
            Self::FaultInjected => "fault_injected",
            Self::PromotionObserved => "promotion_observed",
            Self::ConsistencyVerified => "consistency_verified",
            Self::Reconciled => "reconciled",
            Self::Reported => "reported",
        }
    }
}

impl std::fmt::Display for ScenarioStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a checkpoint scenario failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioFailure {
    /// Ranked daemons did not all become active in time
    #[error("cluster not steady within {timeout:?} before injection")]
    NotSteady {
        /// Wait limit
        timeout: Duration,
    },

    /// Baseline shape missing before injection; nothing was injected
    #[error("precondition failed: expected {expected} before injection, found {observed}")]
    Precondition {
        /// Required shape
        expected: TopologyShape,
        /// Shape seen
        observed: TopologyShape,
    },

    /// A cluster query failed outside a wait
    #[error("cluster query failed: {0}")]
    Cluster(#[from] CoreError),

    /// Arming the kill point or issuing the operation failed
    #[error("injection failed: {0}")]
    Injection(#[from] InjectError),

    /// No original standby became the leading active daemon
    #[error("no standby took over from {victim} within {timeout:?}")]
    NoPromotion {
        /// Killed daemon
        victim: DaemonName,
        /// Wait limit
        timeout: Duration,
    },

    /// The victim process was still running after failover
    #[error("{victim} was still running after the standby took over")]
    VictimSurvived {
        /// Daemon that should have died
        victim: DaemonName,
    },

    /// Fixture directory missing after failover
    #[error("fixture directory {entry} missing after failover")]
    FixtureMissing {
        /// Expected top-level entry
        entry: String,
    },

    /// Restart request failed
    #[error("restart of {victim} failed: {reason}")]
    RestartFailed {
        /// Daemon being restarted
        victim: DaemonName,
        /// Error text
        reason: String,
    },

    /// Victim did not come back as standby
    #[error("{victim} did not rejoin as standby within {timeout:?}")]
    NotReintegrated {
        /// Restarted daemon
        victim: DaemonName,
        /// Wait limit
        timeout: Duration,
    },

    /// Wrong shape after reconciliation
    #[error("postcondition failed: expected {expected}, found {observed}")]
    Postcondition {
        /// Required shape
        expected: TopologyShape,
        /// Shape seen
        observed: TopologyShape,
    },
}

/// Outcome of one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Kill point exercised
    pub checkpoint: Checkpoint,
    /// Whether every stage succeeded
    pub passed: bool,
    /// Last stage completed before the result was reported
    pub stage: ScenarioStage,
    /// Daemon killed
    pub victim: Option<DaemonName>,
    /// Standby that took over
    pub promoted: Option<DaemonName>,
    /// Failure text
    pub reason: Option<String>,
    /// Typed failure
    #[serde(skip)]
    pub failure: Option<ScenarioFailure>,
    /// Wall time spent on the checkpoint
    pub elapsed_ms: u64,
}

impl ScenarioResult {
    /// Whether the scenario failed with a failure matching `pred`
    #[must_use]
    pub fn failed_with(&self, pred: impl FnOnce(&ScenarioFailure) -> bool) -> bool {
        self.failure.as_ref().is_some_and(pred)
    }
}

/// Progress of a scenario while it runs
#[derive(Debug, Clone, Default)]
pub(crate) struct ScenarioProgress {
    pub stage: ScenarioStage,
    pub victim: Option<DaemonName>,
    pub promoted: Option<DaemonName>,
}

impl ScenarioProgress {
    pub fn reached(&mut self, stage: ScenarioStage) {
        debug_assert!(stage > self.stage);
        info!(from = %self.stage, to = %stage, "stage reached");
        self.stage = stage;
    }

    pub fn finish(
        self,
        checkpoint: Checkpoint,
        outcome: Result<(), ScenarioFailure>,
        elapsed: Duration,
    ) -> ScenarioResult {
        let failure = outcome.err();
        ScenarioResult {
            checkpoint,
            passed: failure.is_none(),
            stage: self.stage,
            victim: self.victim,
            promoted: self.promoted,
            reason: failure.as_ref().map(ToString::to_string),
            failure,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
