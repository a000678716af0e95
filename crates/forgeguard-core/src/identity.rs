//! Replica identity and resource name derivation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bech32 prefix stripped from pool ids when deriving short names.
const POOL_ID_PREFIX: &str = "pool1";

/// Length of the short pool id used in derived resource names.
const POOL_ID_SHORT_LEN: usize = 8;

/// Lease name used by deployments that predate multi-tenant naming.
pub const LEGACY_LEASE_NAME: &str = "cardano-node-leader";

/// Status object name used by deployments that predate multi-tenant naming.
pub const LEGACY_STATUS_NAME: &str = "cardano-forge-status";

/// Immutable identity of this replica.
///
/// The tenant tuple (`network`, `pool_id`) scopes every coordination resource
/// the supervisor touches. It is fixed for the lifetime of the process;
/// changing it requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaIdentity {
    /// Pod name, unique within the cluster
    pub pod_name: String,

    /// Namespace the pod runs in
    pub namespace: String,

    /// Cardano network name (e.g. `mainnet`, `preprod`)
    pub network: String,

    /// Bech32 pool id, when running multi-tenant
    pub pool_id: Option<String>,

    /// Region label of the hosting cluster, when cluster management is enabled
    pub region: Option<String>,

    /// Application type label (e.g. `block-producer`)
    pub application: String,
}

impl ReplicaIdentity {
    /// Whether this replica carries a full tenant tuple.
    pub fn is_multi_tenant(&self) -> bool {
        self.pool_id.is_some()
    }

    /// Short pool id: the first characters of the pool id after stripping the
    /// bech32 prefix. Used to derive resource names.
    pub fn pool_id_short(&self) -> Option<String> {
        self.pool_id.as_deref().map(|id| {
            let stripped = id.strip_prefix(POOL_ID_PREFIX).unwrap_or(id);
            stripped.chars().take(POOL_ID_SHORT_LEN).collect()
        })
    }

    /// Name of the leader-election lease for this tenant.
    pub fn lease_name(&self) -> String {
        match self.pool_id_short() {
            Some(short) => format!("cardano-leader-{}-{}", self.network, short),
            None => LEGACY_LEASE_NAME.to_string(),
        }
    }

    /// Name of the per-tenant forge status object.
    pub fn status_name(&self) -> String {
        match self.pool_id_short() {
            Some(short) => format!("{}-{}-{}", LEGACY_STATUS_NAME, self.network, short),
            None => LEGACY_STATUS_NAME.to_string(),
        }
    }

    /// Name of this cluster's state object: `{network}-{poolIdShort}-{region}`.
    ///
    /// Requires both the tenant tuple and a region.
    pub fn cluster_object_name(&self) -> Option<String> {
        let short = self.pool_id_short()?;
        let region = self.region.as_deref()?;
        Some(format!("{}-{}-{}", self.network, short, region))
    }

    /// Labels identifying this tenant on cluster state objects.
    ///
    /// Peer discovery matches on `network` and `pool-id`; `region`
    /// distinguishes the clusters.
    pub fn tenant_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("network".to_string(), self.network.clone());
        if let Some(pool_id) = &self.pool_id {
            labels.insert("pool-id".to_string(), pool_id.clone());
        }
        if let Some(region) = &self.region {
            labels.insert("region".to_string(), region.clone());
        }
        labels
    }

    /// Labels used to discover peer cluster state objects (region excluded).
    pub fn peer_selector(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("network".to_string(), self.network.clone());
        if let Some(pool_id) = &self.pool_id {
            labels.insert("pool-id".to_string(), pool_id.clone());
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(pool_id: Option<&str>, region: Option<&str>) -> ReplicaIdentity {
        ReplicaIdentity {
            pod_name: "pod-0".to_string(),
            namespace: "cardano".to_string(),
            network: "mainnet".to_string(),
            pool_id: pool_id.map(String::from),
            region: region.map(String::from),
            application: "block-producer".to_string(),
        }
    }

    #[test]
    fn test_pool_id_short_strips_prefix() {
        let id = identity(Some("pool1abcdefghijklmnop"), None);
        assert_eq!(id.pool_id_short().unwrap(), "abcdefgh");
    }

    #[test]
    fn test_pool_id_short_without_prefix() {
        let id = identity(Some("abcdefghijklmnop"), None);
        assert_eq!(id.pool_id_short().unwrap(), "abcdefgh");
    }

    #[test]
    fn test_lease_name_multi_tenant() {
        let id = identity(Some("pool1abcdefghijklmnop"), None);
        assert_eq!(id.lease_name(), "cardano-leader-mainnet-abcdefgh");
    }

    #[test]
    fn test_lease_name_legacy() {
        let id = identity(None, None);
        assert_eq!(id.lease_name(), LEGACY_LEASE_NAME);
    }

    #[test]
    fn test_cluster_object_name() {
        let id = identity(Some("pool1abcdefghijklmnop"), Some("us-east-1"));
        assert_eq!(
            id.cluster_object_name().unwrap(),
            "mainnet-abcdefgh-us-east-1"
        );

        let no_region = identity(Some("pool1abcdefghijklmnop"), None);
        assert!(no_region.cluster_object_name().is_none());
    }

    #[test]
    fn test_peer_selector_excludes_region() {
        let id = identity(Some("pool1abc"), Some("us-east-1"));
        let selector = id.peer_selector();
        assert!(selector.contains_key("network"));
        assert!(selector.contains_key("pool-id"));
        assert!(!selector.contains_key("region"));
    }
}
