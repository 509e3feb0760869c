//! KILLPOINT Simulated Cluster
//!
//! An in-memory metadata cluster that implements the admin, topology, mount
//! and lifecycle interfaces. Kill points crash the exporting daemon, the
//! monitor fails its rank after the beacon grace and a standby takes over.
//! Timing jitter is drawn from a seeded RNG so every run is reproducible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod daemon;
pub mod failure;
pub mod record;
pub mod seed;

pub use cluster::{SimCluster, SimConfig};
pub use daemon::{DaemonEvent, SimDaemon, SimDaemonState};
pub use failure::{FaultPlan, ScheduledFault, SimFault};
pub use record::{SimEvent, SimRecord};
pub use seed::{SeedSource, SimSeed};
