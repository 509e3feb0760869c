//! KILLPOINT Harness
//!
//! Drives kill-point failover scenarios against a metadata cluster:
//! - Setup brings the cluster to two active ranks and one standby
//! - The injector arms a kill point on the rank-0 daemon and triggers an export
//! - The poller waits for a standby to take over
//! - The checker confirms the fixture survived
//! - The reconciler restarts the victim and restores the baseline
//!
//! Checkpoints run one at a time; the batch passes only if every one did.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
pub mod error;
pub mod injector;
pub mod poller;
pub mod reconciler;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod setup;

pub use consistency::ConsistencyChecker;
pub use error::HarnessError;
pub use injector::{FaultInjector, InjectError, InjectionOutcome};
pub use poller::{PollOutcome, Poller};
pub use reconciler::ClusterReconciler;
pub use report::BatchReport;
pub use runner::{ClusterHandles, ScenarioRunner};
pub use scenario::{ScenarioFailure, ScenarioResult, ScenarioStage};
pub use setup::{FixtureState, Setup, SetupError};
