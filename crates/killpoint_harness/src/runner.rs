//! Sequential execution of every checkpoint scenario.

use crate::consistency::ConsistencyChecker;
use crate::error::HarnessError;
use crate::injector::{FaultInjector, InjectionOutcome};
use crate::poller::Poller;
use crate::reconciler::ClusterReconciler;
use crate::report::BatchReport;
use crate::scenario::{ScenarioFailure, ScenarioProgress, ScenarioResult, ScenarioStage};
use crate::setup::{wait_for_steady_state, FixtureState, Setup};
use killpoint_cluster::{ClusterAdmin, ClusterView, MountClient, NodeLifecycle, TopologySource};
use killpoint_core::{Checkpoint, CoreError, HarnessConfig, TopologyShape};
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// The four collaborators a run needs
#[derive(Clone)]
pub struct ClusterHandles {
    /// Admin commands and config
    pub admin: Arc<dyn ClusterAdmin>,
    /// Role snapshots
    pub topology: Arc<dyn TopologySource>,
    /// Client mount
    pub mount: Arc<dyn MountClient>,
    /// Daemon restarts
    pub lifecycle: Arc<dyn NodeLifecycle>,
}

impl ClusterHandles {
    /// Use one value for every collaborator
    #[must_use]
    pub fn shared<C>(cluster: Arc<C>) -> Self
    where
        C: ClusterAdmin + TopologySource + MountClient + NodeLifecycle + 'static,
    {
        Self {
            admin: cluster.clone(),
            topology: cluster.clone(),
            mount: cluster.clone(),
            lifecycle: cluster,
        }
    }
}

/// Runs checkpoints `1..=N` one at a time against one cluster
pub struct ScenarioRunner {
    config: HarnessConfig,
    view: ClusterView,
    poller: Poller,
    lifecycle: Arc<dyn NodeLifecycle>,
    setup: Setup,
    injector: FaultInjector,
    checker: ConsistencyChecker,
    reconciler: ClusterReconciler,
}

impl ScenarioRunner {
    /// Wire a runner over `handles`
    #[must_use]
    pub fn new(config: HarnessConfig, handles: ClusterHandles) -> Self {
        let view = ClusterView::new(handles.admin.clone(), handles.topology);
        let poller = Poller::new(config.poll_interval());
        Self {
            setup: Setup::new(view.clone(), handles.mount.clone(), config.clone()),
            injector: FaultInjector::new(handles.admin, &config),
            checker: ConsistencyChecker::new(handles.mount),
            reconciler: ClusterReconciler::new(
                handles.lifecycle.clone(),
                view.clone(),
                poller,
                config.reintegration_timeout(),
                config.healthy_shape(),
            ),
            lifecycle: handles.lifecycle,
            view,
            poller,
            config,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run setup, then every checkpoint in order.
    ///
    /// Per-checkpoint failures are recorded in the report and the batch moves
    /// on. Pass the returned [`FixtureState`] to the next batch so the fixture
    /// is not written twice.
    ///
    /// # Errors
    ///
    /// Returns `Setup` if the cluster cannot be brought to the baseline.
    pub async fn run_batch(
        &self,
        fixture: FixtureState,
    ) -> Result<(BatchReport, FixtureState), HarnessError> {
        let fixture = self.setup.prepare(fixture).await?;
        let mut report = BatchReport::new(self.config.checkpoint_count);

        for checkpoint in Checkpoint::range(self.config.checkpoint_count) {
            let result = self.run_checkpoint(checkpoint).await;
            match &result.reason {
                None => info!(%checkpoint, elapsed_ms = result.elapsed_ms, "checkpoint passed"),
                Some(reason) => warn!(%checkpoint, stage = %result.stage, %reason, "checkpoint failed"),
            }
            report.push(result);
        }

        info!(
            passed = report.pass_count(),
            total = self.config.checkpoint_count,
            "batch finished"
        );
        Ok((report, fixture))
    }

    /// Run one checkpoint scenario to completion
    #[instrument(skip_all, fields(checkpoint = checkpoint.as_u32()))]
    pub async fn run_checkpoint(&self, checkpoint: Checkpoint) -> ScenarioResult {
        let started = Instant::now();
        let mut progress = ScenarioProgress::default();
        let outcome = self.drive(checkpoint, &mut progress).await;
        let result = progress.finish(checkpoint, outcome, started.elapsed());
        info!(stage = %ScenarioStage::Reported, passed = result.passed, "scenario reported");
        result
    }

    async fn drive(
        &self,
        checkpoint: Checkpoint,
        progress: &mut ScenarioProgress,
    ) -> Result<(), ScenarioFailure> {
        let expected = self.config.healthy_shape();

        // preconditions
        let timeout = self.config.setup_timeout();
        let steady =
            wait_for_steady_state(&self.view, &self.poller, self.config.active_slots, timeout).await;
        if !steady.is_satisfied() {
            return Err(ScenarioFailure::NotSteady { timeout });
        }
        let topology = self.view.topology().await?;
        let observed = topology.shape();
        if !has_baseline(observed, expected) {
            return Err(ScenarioFailure::Precondition { expected, observed });
        }
        let Some(victim) = topology.leading_active() else {
            return Err(ScenarioFailure::Precondition { expected, observed });
        };
        let standbys = topology.standby_names();
        let grace = self
            .view
            .config_duration(&self.config.grace_config_key, &self.config.grace_scope)
            .await?;
        progress.victim = Some(victim.clone());
        progress.reached(ScenarioStage::PreconditionsChecked);
        info!(%victim, ?standbys, ?grace, "preconditions checked");

        match self.injector.inject(&victim, checkpoint).await? {
            InjectionOutcome::Interrupted(reason) => info!(%victim, %reason, "fault injected"),
            InjectionOutcome::Completed => warn!(%victim, "operation completed despite kill point"),
        }
        progress.reached(ScenarioStage::FaultInjected);

        let timeout = self.config.promotion_timeout(grace);
        let view = &self.view;
        let standbys = &standbys;
        let leader = OnceLock::new();
        let leader_slot = &leader;
        let promotion = self
            .poller
            .wait_until("standby promoted", timeout, move || async move {
                let active = view.active_nodes().await?;
                match active.into_iter().next() {
                    Some(first) if standbys.contains(&first) => {
                        let _ = leader_slot.set(first);
                        Ok::<_, CoreError>(true)
                    }
                    _ => Ok(false),
                }
            })
            .await;
        if !promotion.is_satisfied() {
            return Err(ScenarioFailure::NoPromotion { victim, timeout });
        }
        let promoted = leader.into_inner();
        info!(%victim, ?promoted, elapsed_ms = promotion.elapsed().as_millis() as u64, "promotion observed");
        progress.promoted = promoted;

        if self.config.verify_process_death {
            match self.lifecycle.is_alive(&victim).await {
                Ok(Some(true)) => return Err(ScenarioFailure::VictimSurvived { victim }),
                Ok(Some(false)) => {}
                Ok(None) => warn!(%victim, "victim liveness unknown"),
                Err(err) => warn!(%victim, error = %err, "victim liveness check failed"),
            }
        }
        progress.reached(ScenarioStage::PromotionObserved);

        let entry = &self.config.fixture.dir;
        if !self.checker.verify(entry).await? {
            return Err(ScenarioFailure::FixtureMissing {
                entry: entry.clone(),
            });
        }
        progress.reached(ScenarioStage::ConsistencyVerified);

        let shape = self.reconciler.restart_and_wait_standby(&victim).await?;
        progress.reached(ScenarioStage::Reconciled);
        info!(%victim, %shape, "cluster reconciled");
        Ok(())
    }
}

/// Exact standby count and rank count required before killing anything
fn has_baseline(observed: TopologyShape, expected: TopologyShape) -> bool {
    observed.standby == expected.standby && observed.ranks == expected.ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use killpoint_core::{CoreResult, DaemonName};
    use killpoint_sim::{FaultPlan, SimCluster, SimConfig, SimFault};
    use std::time::Duration;

    fn runner(cluster: &Arc<SimCluster>, config: HarnessConfig) -> ScenarioRunner {
        ScenarioRunner::new(config, ClusterHandles::shared(cluster.clone()))
    }

    fn cluster_with(faults: FaultPlan) -> Arc<SimCluster> {
        Arc::new(SimCluster::with_faults(SimConfig::default(), faults))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_checkpoints_pass_on_healthy_cluster() {
        let cluster = cluster_with(FaultPlan::new());
        let (report, fixture) = runner(&cluster, HarnessConfig::default())
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        assert!(fixture.is_initialized());
        assert_eq!(report.pass_count(), 9);
        assert!(report.verdict().is_ok());
        for result in &report.results {
            assert_eq!(result.stage, ScenarioStage::Reconciled);
            assert_ne!(result.victim, result.promoted);
        }
        assert_eq!(cluster.record().count_prefixed("crashed at kill point"), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_victim_is_leading_active_and_standby_takes_over() {
        let cluster = cluster_with(FaultPlan::new());
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(2))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        let first = &report.results[0];
        assert_eq!(first.victim.as_ref().map(|d| d.as_str()), Some("a"));
        assert_eq!(first.promoted.as_ref().map(|d| d.as_str()), Some("c"));
        // the first victim is the standby for the second round
        let second = &report.results[1];
        assert_eq!(second.victim.as_ref().map(|d| d.as_str()), Some("c"));
        assert_eq!(second.promoted.as_ref().map(|d| d.as_str()), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_batch_reuses_fixture() {
        let cluster = cluster_with(FaultPlan::new());
        let runner = runner(&cluster, HarnessConfig::default().with_checkpoint_count(1));

        let (_, fixture) = runner.run_batch(FixtureState::Uninitialized).await.unwrap();
        let (report, again) = runner.run_batch(fixture).await.unwrap();
        assert_eq!(fixture, again);
        assert!(report.all_passed());
        assert_eq!(cluster.fixture_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_standby_fails_without_injecting() {
        let cluster = Arc::new(SimCluster::new(SimConfig::default().with_daemons(&["a", "b"])));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(2))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        assert_eq!(report.pass_count(), 0);
        for result in &report.results {
            assert_eq!(result.stage, ScenarioStage::Init);
            assert!(result.failed_with(|f| matches!(f, ScenarioFailure::Precondition { .. })));
        }
        assert_eq!(cluster.record().count_prefixed("armed kill point"), 0);
        assert!(report.verdict().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_promotion_fails_checkpoint() {
        let cluster = cluster_with(FaultPlan::new().with_fault(Checkpoint::new(2), SimFault::NoPromotion));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(2))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        assert!(report.results[0].passed);
        let failed = &report.results[1];
        assert_eq!(failed.stage, ScenarioStage::FaultInjected);
        assert!(failed.failed_with(|f| matches!(f, ScenarioFailure::NoPromotion { .. })));
        assert_eq!(report.failed_checkpoints(), vec![Checkpoint::new(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_fixture_fails_consistency() {
        let cluster = cluster_with(FaultPlan::new().with_fault(Checkpoint::new(1), SimFault::LoseFixture));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(1))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        let result = &report.results[0];
        assert_eq!(result.stage, ScenarioStage::PromotionObserved);
        assert_eq!(
            result.reason.as_deref(),
            Some("fixture directory abc missing after failover")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_victim_not_rejoining_fails_reconciliation() {
        let cluster = cluster_with(FaultPlan::new().with_fault(Checkpoint::new(1), SimFault::NoRejoin));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(1))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        let result = &report.results[0];
        assert_eq!(result.stage, ScenarioStage::ConsistencyVerified);
        assert!(result.failed_with(|f| matches!(f, ScenarioFailure::NotReintegrated { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_kill_point_does_not_stop_batch() {
        let cluster =
            cluster_with(FaultPlan::new().with_fault(Checkpoint::new(2), SimFault::RejectCheckpoint));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(3))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        assert_eq!(report.pass_count(), 2);
        let rejected = &report.results[1];
        assert_eq!(rejected.stage, ScenarioStage::PreconditionsChecked);
        assert!(rejected.failed_with(|f| matches!(f, ScenarioFailure::Injection(_))));
        assert!(report.results[2].passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surviving_victim_fails_promotion() {
        let cluster =
            cluster_with(FaultPlan::new().with_fault(Checkpoint::new(1), SimFault::SurviveCheckpoint));
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(2))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        assert!(report.results[0].failed_with(|f| matches!(f, ScenarioFailure::NoPromotion { .. })));
        assert!(report.results[1].passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_death_check_passes_when_victim_dead() {
        let cluster = cluster_with(FaultPlan::new());
        let config = HarnessConfig::default()
            .with_checkpoint_count(1)
            .with_verify_process_death(true);
        let (report, _) = runner(&cluster, config)
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();
        assert!(report.all_passed());
    }

    /// Restarts through the simulation but always reports the daemon as running
    struct AlwaysAlive(Arc<SimCluster>);

    #[async_trait::async_trait]
    impl NodeLifecycle for AlwaysAlive {
        async fn restart(&self, daemon: &DaemonName) -> CoreResult<()> {
            self.0.restart(daemon).await
        }

        async fn is_alive(&self, _: &DaemonName) -> CoreResult<Option<bool>> {
            Ok(Some(true))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_death_check_fails_when_victim_survives() {
        let cluster = cluster_with(FaultPlan::new());
        let handles = ClusterHandles {
            lifecycle: Arc::new(AlwaysAlive(cluster.clone())),
            ..ClusterHandles::shared(cluster.clone())
        };
        let config = HarnessConfig::default()
            .with_checkpoint_count(1)
            .with_verify_process_death(true);
        let (report, _) = ScenarioRunner::new(config, handles)
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        let result = &report.results[0];
        assert_eq!(result.stage, ScenarioStage::FaultInjected);
        assert!(result.failed_with(|f| matches!(f, ScenarioFailure::VictimSurvived { .. })));
        assert_eq!(
            result.reason.as_deref(),
            Some("a was still running after the standby took over")
        );
        assert_eq!(result.promoted.as_ref().map(|d| d.as_str()), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_timeout_follows_cluster_grace() {
        let cluster = cluster_with(FaultPlan::new());
        // the simulated takeover still needs the full 15s grace
        cluster.set_config_value("mon", "mds_beacon_grace", "3");
        let (report, _) = runner(&cluster, HarnessConfig::default().with_checkpoint_count(1))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();

        let result = &report.results[0];
        assert_eq!(
            result.failure,
            Some(ScenarioFailure::NoPromotion {
                victim: DaemonName::new("a"),
                timeout: Duration::from_secs(12),
            })
        );
        assert_eq!(result.reason.as_deref(), Some("no standby took over from a within 12s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_setup_timeout_does_not_panic() {
        let cluster = cluster_with(FaultPlan::new());
        let config = HarnessConfig::from_json(
            r#"{"setup_timeout_secs": 18446744073709551615, "checkpoint_count": 1}"#,
        )
        .unwrap();
        let (report, _) = runner(&cluster, config)
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap();
        assert!(report.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_aborts_batch() {
        let cluster = Arc::new(SimCluster::new(SimConfig::default().with_daemons(&["a"])));
        let err = runner(&cluster, HarnessConfig::default().with_setup_timeout(5))
            .run_batch(FixtureState::Uninitialized)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Setup(_)));
        assert_eq!(cluster.record().count_prefixed("armed kill point"), 0);
    }
}
