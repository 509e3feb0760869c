//! Namespace survival check after failover.

use killpoint_cluster::MountClient;
use killpoint_core::CoreResult;
use std::sync::Arc;
use tracing::debug;

/// Checks that the fixture is still visible through the client mount
pub struct ConsistencyChecker {
    mount: Arc<dyn MountClient>,
}

impl ConsistencyChecker {
    /// Create a checker over a mount
    #[must_use]
    pub fn new(mount: Arc<dyn MountClient>) -> Self {
        Self { mount }
    }

    /// Whether `expected_entry` is among the mount's top-level entries
    ///
    /// # Errors
    ///
    /// Returns error if the mount cannot be listed
    pub async fn verify(&self, expected_entry: &str) -> CoreResult<bool> {
        let entries = self.mount.list_top_level_entries().await?;
        debug!(expected = expected_entry, entries = entries.len(), "listed mount root");
        Ok(entries.contains(expected_entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killpoint_cluster::CommandMount;

    #[tokio::test]
    async fn test_verify_against_directory() {
        let root = tempfile::tempdir().unwrap();
        let checker = ConsistencyChecker::new(Arc::new(CommandMount::new(root.path())));

        assert!(!checker.verify("abc").await.unwrap());
        std::fs::create_dir(root.path().join("abc")).unwrap();
        assert!(checker.verify("abc").await.unwrap());
        assert!(!checker.verify("ab").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_propagates_listing_error() {
        let checker = ConsistencyChecker::new(Arc::new(CommandMount::new("/nonexistent/killpoint")));
        assert!(checker.verify("abc").await.is_err());
    }
}
