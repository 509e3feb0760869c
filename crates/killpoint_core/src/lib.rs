//! KILLPOINT Core Types
//!
//! Identifiers, the observed cluster topology, harness configuration and the
//! shared error type. No I/O beyond reading a config file.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;
pub mod topology;

// Re-exports
pub use config::{parse_grace, FixtureConfig, HarnessConfig};
pub use error::{CoreError, CoreResult};
pub use id::{Checkpoint, DaemonName, Rank, RunId};
pub use topology::{ClusterTopology, DaemonInfo, DaemonState, TopologyShape};
