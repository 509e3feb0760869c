//! Bringing the cluster to the scenario baseline and laying down the fixture.

use crate::poller::{PollOutcome, Poller};
use chrono::{DateTime, Utc};
use killpoint_cluster::{ClusterAdmin, ClusterView, MountClient};
use killpoint_core::{CoreError, HarnessConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether the test data fixture exists yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FixtureState {
    /// Nothing written yet
    #[default]
    Uninitialized,
    /// Fixture directory and file were written
    Initialized {
        /// When the fixture was written
        created_at: DateTime<Utc>,
    },
}

impl FixtureState {
    /// Whether the fixture has been written
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized { .. })
    }
}

/// Setup failure; aborts the batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// Talking to the cluster failed
    #[error("cluster error during setup: {0}")]
    Cluster(#[from] CoreError),

    /// Daemons did not settle
    #[error("cluster not steady within {timeout:?}")]
    NotSteady {
        /// Wait limit
        timeout: Duration,
        /// Last probe error
        last_error: Option<String>,
    },

    /// Wrong number of active daemons after settling
    #[error("expected {expected} active daemons, found {observed}")]
    ActiveCount {
        /// Requested slots
        expected: usize,
        /// Active daemons seen
        observed: usize,
    },

    /// Mount or fixture write failed
    #[error("fixture setup failed: {0}")]
    Fixture(CoreError),
}

/// Wait until every ranked daemon is active and `active_slots` of them serve
pub(crate) async fn wait_for_steady_state(
    view: &ClusterView,
    poller: &Poller,
    active_slots: usize,
    timeout: Duration,
) -> PollOutcome {
    poller
        .wait_until("cluster steady", timeout, move || async move {
            let topology = view.topology().await?;
            Ok::<_, CoreError>(topology.is_steady(active_slots))
        })
        .await
}

/// Brings the cluster to the scenario baseline
pub struct Setup {
    admin: Arc<dyn ClusterAdmin>,
    view: ClusterView,
    mount: Arc<dyn MountClient>,
    poller: Poller,
    config: HarnessConfig,
}

impl Setup {
    /// Create a setup step
    #[must_use]
    pub fn new(view: ClusterView, mount: Arc<dyn MountClient>, config: HarnessConfig) -> Self {
        Self {
            admin: Arc::clone(view.admin()),
            view,
            mount,
            poller: Poller::new(config.poll_interval()),
            config,
        }
    }

    /// Request the active slots, wait for steady state, remount and write
    /// the fixture if `fixture` says it does not exist yet.
    ///
    /// Returns the fixture state to pass to the next call.
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if any step fails. Setup is not retried.
    pub async fn prepare(&self, fixture: FixtureState) -> Result<FixtureState, SetupError> {
        let slots = self.config.active_slots;
        self.admin.request_active_slots(slots).await?;
        info!(slots, "requested active slots");

        let timeout = self.config.setup_timeout();
        let outcome = wait_for_steady_state(&self.view, &self.poller, slots, timeout).await;
        if !outcome.is_satisfied() {
            error!(?timeout, "cluster did not reach steady state");
            return Err(SetupError::NotSteady {
                timeout,
                last_error: outcome.last_error().map(str::to_string),
            });
        }

        let active = self.view.active_nodes().await?;
        if active.len() != slots {
            error!(expected = slots, observed = active.len(), "wrong active count");
            return Err(SetupError::ActiveCount {
                expected: slots,
                observed: active.len(),
            });
        }
        info!(?active, "cluster steady");

        if let Err(err) = self.mount.unmount().await {
            warn!(error = %err, "unmount before remount failed");
        }
        self.mount.mount().await.map_err(SetupError::Fixture)?;

        if fixture.is_initialized() {
            debug!("fixture already written");
            return Ok(fixture);
        }

        let spec = &self.config.fixture;
        self.mount.make_dir(&spec.dir).await.map_err(SetupError::Fixture)?;
        self.mount
            .write_fixture(&spec.file_path(), spec.size_mb)
            .await
            .map_err(SetupError::Fixture)?;
        info!(path = %spec.file_path(), size_mb = spec.size_mb, "fixture written");

        Ok(FixtureState::Initialized {
            created_at: Utc::now(),
        })
    }
}
