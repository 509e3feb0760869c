//! Recording of what happened inside a simulated cluster.

use crate::seed::SimSeed;
use killpoint_core::DaemonName;
use serde::{Deserialize, Serialize};

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimEvent {
    /// Milliseconds since the cluster was created
    pub at_ms: u64,
    /// Daemon involved, if any
    pub daemon: Option<DaemonName>,
    /// Short event description
    pub event: String,
}

/// Record of a simulated cluster's history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRecord {
    /// Seed used for the simulation
    pub seed: SimSeed,
    /// Events in order
    pub events: Vec<SimEvent>,
}

impl SimRecord {
    /// Create an empty record for `seed`
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            events: Vec::new(),
        }
    }

    /// Append an event
    pub fn push(&mut self, at_ms: u64, daemon: Option<&DaemonName>, event: impl Into<String>) {
        self.events.push(SimEvent {
            at_ms,
            daemon: daemon.cloned(),
            event: event.into(),
        });
    }

    /// Get event count
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Events for one daemon
    #[must_use]
    pub fn events_for(&self, daemon: &DaemonName) -> Vec<&SimEvent> {
        self.events
            .iter()
            .filter(|e| e.daemon.as_ref() == Some(daemon))
            .collect()
    }

    /// Number of events whose description starts with `prefix`
    #[must_use]
    pub fn count_prefixed(&self, prefix: &str) -> usize {
        self.events.iter().filter(|e| e.event.starts_with(prefix)).count()
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
