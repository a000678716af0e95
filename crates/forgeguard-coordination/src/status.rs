//! Per-tenant forge status object.

use crate::error::{CoordinationError, Result};
use crate::store::CoordinationStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Cluster-visible record of which pod leads a tenant and whether it forges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeStatus {
    /// Pod currently recorded as leader
    pub leader_pod: String,

    /// Whether that pod is forging
    pub forging_enabled: bool,

    /// When this record last changed hands or flipped
    pub last_transition_time: DateTime<Utc>,
}

/// Writes the forge status object for one tenant.
///
/// The current leader writes every tick, without an unchanged-value
/// optimization; followers only ever clear a stale entry naming themselves.
pub struct StatusReporter {
    store: Arc<dyn CoordinationStore>,
    namespace: String,
    name: String,
    pod_name: String,
}

impl StatusReporter {
    /// Create a reporter for the given tenant status object.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        pod_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            name: name.into(),
            pod_name: pod_name.into(),
        }
    }

    /// Publish this pod as leader. Called every tick while leading.
    pub async fn publish(&self, forging_enabled: bool) -> Result<()> {
        let status = ForgeStatus {
            leader_pod: self.pod_name.clone(),
            forging_enabled,
            last_transition_time: Utc::now(),
        };
        self.store
            .upsert_forge_status(&self.namespace, &self.name, status)
            .await
    }

    /// Clear the status object iff it still records this pod as leader.
    ///
    /// Reads first; when another pod has already taken over, performs zero
    /// writes. Returns whether a clear happened.
    pub async fn clear_if_self(&self) -> Result<bool> {
        let current = match self.store.get_forge_status(&self.namespace, &self.name).await {
            Ok(status) => status,
            Err(CoordinationError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        if current.leader_pod != self.pod_name {
            debug!(
                status = %self.name,
                leader = %current.leader_pod,
                "Skipping status clear; another pod leads"
            );
            return Ok(false);
        }

        self.store
            .clear_forge_status(&self.namespace, &self.name)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn reporter(store: &Arc<MemoryStore>, pod: &str) -> StatusReporter {
        StatusReporter::new(
            Arc::clone(store) as Arc<dyn CoordinationStore>,
            "default",
            "cardano-forge-status-mainnet-abcdefgh",
            pod,
        )
    }

    #[tokio::test]
    async fn test_publish_and_read_back() {
        let store = Arc::new(MemoryStore::new());
        let reporter = reporter(&store, "pod-0");

        reporter.publish(true).await.unwrap();

        let status = store
            .get_forge_status("default", "cardano-forge-status-mainnet-abcdefgh")
            .await
            .unwrap();
        assert_eq!(status.leader_pod, "pod-0");
        assert!(status.forging_enabled);
    }

    #[tokio::test]
    async fn test_clear_only_when_self() {
        let store = Arc::new(MemoryStore::new());
        let old_leader = reporter(&store, "pod-0");
        let new_leader = reporter(&store, "pod-1");

        // pod-1 has already taken over; pod-0 must not write.
        new_leader.publish(true).await.unwrap();
        assert!(!old_leader.clear_if_self().await.unwrap());

        let status = store
            .get_forge_status("default", "cardano-forge-status-mainnet-abcdefgh")
            .await
            .unwrap();
        assert_eq!(status.leader_pod, "pod-1");
    }

    #[tokio::test]
    async fn test_clear_own_stale_entry() {
        let store = Arc::new(MemoryStore::new());
        let reporter = reporter(&store, "pod-0");

        reporter.publish(false).await.unwrap();
        assert!(reporter.clear_if_self().await.unwrap());

        let err = store
            .get_forge_status("default", "cardano-forge-status-mainnet-abcdefgh")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_clear_absent_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let reporter = reporter(&store, "pod-0");
        assert!(!reporter.clear_if_self().await.unwrap());
    }
}
