//! Read-only queries over the live cluster role assignment.

use crate::admin::ClusterAdmin;
use async_trait::async_trait;
use killpoint_core::{
    parse_grace, ClusterTopology, CoreResult, DaemonName, Rank, TopologyShape,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Source of topology snapshots
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Take a fresh snapshot of daemon roles
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnreachable` if the monitor cannot be queried
    async fn snapshot(&self) -> CoreResult<ClusterTopology>;
}

/// Live view of the cluster
///
/// Every call goes to the cluster. Nothing is cached: the waits built on top
/// of this view need to see each state transition as it happens.
#[derive(Clone)]
pub struct ClusterView {
    admin: Arc<dyn ClusterAdmin>,
    source: Arc<dyn TopologySource>,
}

impl ClusterView {
    /// Create a view over an admin interface and a topology source
    #[must_use]
    pub fn new(admin: Arc<dyn ClusterAdmin>, source: Arc<dyn TopologySource>) -> Self {
        Self { admin, source }
    }

    /// Admin interface this view reads config through
    #[must_use]
    pub fn admin(&self) -> &Arc<dyn ClusterAdmin> {
        &self.admin
    }

    /// Validated snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable or the snapshot is malformed
    pub async fn topology(&self) -> CoreResult<ClusterTopology> {
        let topology = self.source.snapshot().await?;
        topology.validate()?;
        Ok(topology)
    }

    /// Active daemons in rank order
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable
    pub async fn active_nodes(&self) -> CoreResult<Vec<DaemonName>> {
        Ok(self.topology().await?.active_names())
    }

    /// Standby daemons
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable
    pub async fn standby_nodes(&self) -> CoreResult<BTreeSet<DaemonName>> {
        Ok(self.topology().await?.standby_names())
    }

    /// Ranks currently held
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable
    pub async fn ranks(&self) -> CoreResult<BTreeSet<Rank>> {
        Ok(self.topology().await?.ranks())
    }

    /// Count summary from one snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable
    pub async fn shape(&self) -> CoreResult<TopologyShape> {
        Ok(self.topology().await?.shape())
    }

    /// Raw config value
    ///
    /// # Errors
    ///
    /// Returns error if the cluster is unreachable or the key is unknown
    pub async fn config_value(&self, name: &str, scope: &str) -> CoreResult<String> {
        self.admin.get_config(name, scope).await
    }

    /// Config value interpreted as a number of seconds
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be read or parsed
    pub async fn config_duration(&self, name: &str, scope: &str) -> CoreResult<Duration> {
        parse_grace(&self.config_value(name, scope).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{AdminCommand, CommandError, CommandOutput};
    use killpoint_core::{CoreError, DaemonInfo};

    struct Fixed {
        topology: CoreResult<ClusterTopology>,
    }

    #[async_trait]
    impl TopologySource for Fixed {
        async fn snapshot(&self) -> CoreResult<ClusterTopology> {
            self.topology.clone()
        }
    }

    #[async_trait]
    impl ClusterAdmin for Fixed {
        async fn set_config(&self, _: &DaemonName, _: &str, _: &str) -> CoreResult<()> {
            Ok(())
        }

        async fn issue_command(
            &self,
            _: &DaemonName,
            _: &AdminCommand,
        ) -> Result<CommandOutput, CommandError> {
            Ok(CommandOutput::default())
        }

        async fn get_config(&self, key: &str, scope: &str) -> CoreResult<String> {
            assert_eq!((key, scope), ("mds_beacon_grace", "mon"));
            Ok("15.000000".to_string())
        }

        async fn request_active_slots(&self, _: usize) -> CoreResult<()> {
            Ok(())
        }
    }

    fn view(topology: CoreResult<ClusterTopology>) -> ClusterView {
        let fixed = Arc::new(Fixed { topology });
        ClusterView::new(fixed.clone(), fixed)
    }

    #[tokio::test]
    async fn test_view_queries() {
        let view = view(Ok(ClusterTopology::new(vec![
            DaemonInfo::active("b", 1),
            DaemonInfo::active("a", 0),
            DaemonInfo::standby("c"),
        ])));

        assert_eq!(
            view.active_nodes().await.unwrap(),
            vec![DaemonName::new("a"), DaemonName::new("b")]
        );
        assert!(view.standby_nodes().await.unwrap().contains(&DaemonName::new("c")));
        assert_eq!(view.ranks().await.unwrap().len(), 2);
        assert_eq!(view.shape().await.unwrap(), TopologyShape::healthy(2, 1));
        assert_eq!(
            view.config_duration("mds_beacon_grace", "mon").await.unwrap(),
            Duration::from_secs(15)
        );
    }

    #[tokio::test]
    async fn test_view_propagates_unreachable() {
        let view = view(Err(CoreError::unreachable("monitor down")));
        let err = view.active_nodes().await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_view_rejects_duplicate_ranks() {
        let view = view(Ok(ClusterTopology::new(vec![
            DaemonInfo::active("a", 0),
            DaemonInfo::active("b", 0),
        ])));
        assert!(matches!(
            view.topology().await,
            Err(CoreError::InvalidTopology { .. })
        ));
    }
}
