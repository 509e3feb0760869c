//! Restoring the baseline after a failover.

use crate::poller::Poller;
use crate::scenario::ScenarioFailure;
use killpoint_cluster::{ClusterView, NodeLifecycle};
use killpoint_core::{CoreError, DaemonName, TopologyShape};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Restarts a killed daemon and checks the cluster is back to its baseline
pub struct ClusterReconciler {
    lifecycle: Arc<dyn NodeLifecycle>,
    view: ClusterView,
    poller: Poller,
    timeout: Duration,
    expected: TopologyShape,
}

impl ClusterReconciler {
    /// Create a reconciler waiting up to `timeout` for the daemon to rejoin
    #[must_use]
    pub fn new(
        lifecycle: Arc<dyn NodeLifecycle>,
        view: ClusterView,
        poller: Poller,
        timeout: Duration,
        expected: TopologyShape,
    ) -> Self {
        Self {
            lifecycle,
            view,
            poller,
            timeout,
            expected,
        }
    }

    /// Restart `victim`, wait for it to register as standby, then require
    /// the baseline shape.
    ///
    /// # Errors
    ///
    /// Returns `RestartFailed`, `NotReintegrated`, `Postcondition`, or
    /// `Cluster` if the final shape cannot be read.
    pub async fn restart_and_wait_standby(
        &self,
        victim: &DaemonName,
    ) -> Result<TopologyShape, ScenarioFailure> {
        self.lifecycle
            .restart(victim)
            .await
            .map_err(|e| ScenarioFailure::RestartFailed {
                victim: victim.clone(),
                reason: e.to_string(),
            })?;
        info!(%victim, "restart requested");

        let view = &self.view;
        let outcome = self
            .poller
            .wait_until("victim rejoins as standby", self.timeout, move || async move {
                let standbys = view.standby_nodes().await?;
                Ok::<_, CoreError>(standbys.contains(victim))
            })
            .await;
        if !outcome.is_satisfied() {
            return Err(ScenarioFailure::NotReintegrated {
                victim: victim.clone(),
                timeout: self.timeout,
            });
        }
        info!(%victim, elapsed_ms = outcome.elapsed().as_millis() as u64, "victim back as standby");

        let observed = self.view.shape().await?;
        if observed != self.expected {
            return Err(ScenarioFailure::Postcondition {
                expected: self.expected,
                observed,
            });
        }
        Ok(observed)
    }
}
