//! KILLPOINT Cluster Access
//!
//! The narrow interfaces the harness consumes (admin commands, topology,
//! client mount, daemon lifecycle), a live [`ClusterView`] over them, and
//! adapters for a real Ceph cluster.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod ceph;
pub mod lifecycle;
pub mod mount;
mod process;
pub mod view;

pub use admin::{AdminCommand, ClusterAdmin, CommandError, CommandOutput};
pub use ceph::{parse_fs_dump, CephCli, CephConfig};
pub use lifecycle::{NodeLifecycle, SystemdLifecycle};
pub use mount::{CommandMount, MountClient};
pub use view::{ClusterView, TopologySource};
