//! Harness configuration.
//!
//! Defaults reproduce the directory-export kill point scenario: two active
//! ranks, one standby, nine kill points, an 8 MB fixture under `abc`.

use crate::{CoreError, CoreResult, Rank, TopologyShape};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Test data created once and expected to survive every failover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Top-level directory name checked after promotion
    pub dir: String,
    /// File created inside `dir`
    pub file: String,
    /// File size in MiB
    pub size_mb: u64,
}

impl FixtureConfig {
    /// Path of the fixture file relative to the mount root
    #[must_use]
    pub fn file_path(&self) -> String {
        format!("{}/{}", self.dir, self.file)
    }
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            dir: "abc".to_string(),
            file: "abc_file".to_string(),
            size_mb: 8,
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of kill points to exercise (1..=N)
    pub checkpoint_count: u32,
    /// Active metadata ranks requested during setup
    pub active_slots: usize,
    /// Standby daemons required before each injection
    pub standby_count: usize,
    /// Daemon config key that arms the kill point
    pub kill_config_key: String,
    /// Config key holding the failure-detection grace period (seconds)
    pub grace_config_key: String,
    /// Scope the grace key is read from
    pub grace_scope: String,
    /// Promotion timeout = grace * multiplier
    pub grace_multiplier: u32,
    /// Time allowed for the killed daemon to come back as standby
    pub reintegration_timeout_secs: u64,
    /// Time allowed for daemons to settle during setup
    pub setup_timeout_secs: u64,
    /// Interval between poll attempts
    pub poll_interval_ms: u64,
    /// Subtree exported by the monitored operation
    pub export_path: String,
    /// Rank the subtree is exported to
    pub export_target_rank: u32,
    /// Fixture layout
    pub fixture: FixtureConfig,
    /// Fail the scenario when the victim is still alive after promotion
    pub verify_process_death: bool,
}

impl HarnessConfig {
    /// Create a config with the default scenario
    #[must_use]
    pub fn new() -> Self {
        Self {
            checkpoint_count: 9,
            active_slots: 2,
            standby_count: 1,
            kill_config_key: "mds_kill_export_at".to_string(),
            grace_config_key: "mds_beacon_grace".to_string(),
            grace_scope: "mon".to_string(),
            grace_multiplier: 4,
            reintegration_timeout_secs: 60,
            setup_timeout_secs: 300,
            poll_interval_ms: 1000,
            export_path: "/abc".to_string(),
            export_target_rank: 1,
            fixture: FixtureConfig::default(),
            verify_process_death: false,
        }
    }

    /// Set checkpoint count
    #[must_use]
    pub fn with_checkpoint_count(mut self, count: u32) -> Self {
        self.checkpoint_count = count;
        self
    }

    /// Set poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set reintegration timeout
    #[must_use]
    pub fn with_reintegration_timeout(mut self, secs: u64) -> Self {
        self.reintegration_timeout_secs = secs;
        self
    }

    /// Set setup timeout
    #[must_use]
    pub fn with_setup_timeout(mut self, secs: u64) -> Self {
        self.setup_timeout_secs = secs;
        self
    }

    /// Enable or disable the process-death check
    #[must_use]
    pub fn with_verify_process_death(mut self, enabled: bool) -> Self {
        self.verify_process_death = enabled;
        self
    }

    /// Poll interval as a duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reintegration timeout as a duration
    #[must_use]
    pub fn reintegration_timeout(&self) -> Duration {
        Duration::from_secs(self.reintegration_timeout_secs)
    }

    /// Setup timeout as a duration
    #[must_use]
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    /// Promotion timeout for a given grace period
    #[must_use]
    pub fn promotion_timeout(&self, grace: Duration) -> Duration {
        grace.saturating_mul(self.grace_multiplier)
    }

    /// Rank the monitored export targets
    #[must_use]
    pub fn export_target(&self) -> Rank {
        Rank::new(self.export_target_rank)
    }

    /// Healthy topology shape
    #[must_use]
    pub fn healthy_shape(&self) -> TopologyShape {
        TopologyShape::healthy(self.active_slots, self.standby_count)
    }

    /// Check field ranges
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |field: &str, reason: &str| {
            Err(CoreError::Config {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };
        if self.checkpoint_count == 0 {
            return invalid("checkpoint_count", "must be at least 1");
        }
        if self.active_slots == 0 {
            return invalid("active_slots", "must be at least 1");
        }
        if self.export_target_rank as usize >= self.active_slots {
            return invalid("export_target_rank", "must name an active rank");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms", "must be non-zero");
        }
        if self.grace_multiplier == 0 {
            return invalid("grace_multiplier", "must be non-zero");
        }
        if self.fixture.dir.is_empty() || self.fixture.dir.contains('/') {
            return invalid("fixture.dir", "must be a single path component");
        }
        Ok(())
    }

    /// Load from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path.display(), &e))?;
        Self::from_json(&text)
    }

    /// Parse from JSON; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a grace period as printed by the config store (`15`, `15.000000`)
///
/// # Errors
///
/// Returns `Parse` for anything that is not a non-negative number
pub fn parse_grace(value: &str) -> CoreResult<Duration> {
    let secs: f64 = value.trim().parse().map_err(|_| CoreError::Parse {
        message: format!("grace period {:?} is not a number", value),
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CoreError::Parse {
            message: format!("grace period {:?} out of range", value),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}
