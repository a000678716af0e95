//! Coordination store abstraction.
//!
//! The supervisor depends on an external object store for leases, forge
//! status records, and cluster state objects. This module defines the
//! contract; `memory` provides the in-process implementation used by
//! single-API-plane deployments and by every integration test.

pub mod memory;

use crate::cluster::state::{ClusterSpec, ClusterStateObject, ClusterStatus};
use crate::error::Result;
use crate::lease::LeaseRecord;
use crate::status::ForgeStatus;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

pub use memory::MemoryStore;

/// Label selector: an object matches when every selector entry is present
/// with an equal value in the object's labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Create a selector from a label map.
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    /// Whether the given label set satisfies this selector.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Whether the selector is empty (matches everything).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A change observed on a watched cluster state object.
#[derive(Debug, Clone)]
pub enum ClusterWatchEvent {
    /// Object was created
    Added(ClusterStateObject),
    /// Object spec or status changed
    Modified(ClusterStateObject),
    /// Object was removed
    Deleted(ClusterStateObject),
}

impl ClusterWatchEvent {
    /// The object the event carries.
    pub fn object(&self) -> &ClusterStateObject {
        match self {
            ClusterWatchEvent::Added(obj)
            | ClusterWatchEvent::Modified(obj)
            | ClusterWatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Stream of watch events, terminated by the store or by an error the
/// consumer answers with a list-based resync.
pub type ClusterWatchStream = BoxStream<'static, Result<ClusterWatchEvent>>;

/// The coordination store contract.
///
/// Updates carry the version token read earlier; a concurrent writer wins the
/// race by making the loser's update fail with `Conflict`. Callers tolerate
/// `Conflict` and `NotFound` by retrying on their next tick.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Fetch a lease by name.
    async fn get_lease(&self, namespace: &str, name: &str) -> Result<LeaseRecord>;

    /// Create a lease; fails with `AlreadyExists` when present.
    async fn create_lease(&self, namespace: &str, lease: LeaseRecord) -> Result<LeaseRecord>;

    /// Update a lease; the record's version is the optimistic-concurrency
    /// precondition.
    async fn update_lease(&self, namespace: &str, lease: LeaseRecord) -> Result<LeaseRecord>;

    /// Fetch the forge status object for a tenant.
    async fn get_forge_status(&self, namespace: &str, name: &str) -> Result<ForgeStatus>;

    /// Create or replace the forge status object.
    async fn upsert_forge_status(
        &self,
        namespace: &str,
        name: &str,
        status: ForgeStatus,
    ) -> Result<()>;

    /// Remove the forge status object; absent is not an error.
    async fn clear_forge_status(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a cluster state object by name.
    async fn get_cluster_state(&self, namespace: &str, name: &str) -> Result<ClusterStateObject>;

    /// Create a cluster state object; fails with `AlreadyExists` when present.
    async fn create_cluster_state(
        &self,
        namespace: &str,
        object: ClusterStateObject,
    ) -> Result<ClusterStateObject>;

    /// Replace the externally-authored spec of a cluster state object.
    async fn update_cluster_spec(
        &self,
        namespace: &str,
        name: &str,
        spec: ClusterSpec,
    ) -> Result<ClusterStateObject>;

    /// List cluster state objects matching the selector.
    async fn list_cluster_states(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterStateObject>>;

    /// Replace the status of a cluster state object.
    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: ClusterStatus,
    ) -> Result<ClusterStateObject>;

    /// Open a watch over cluster state objects matching the selector.
    ///
    /// The stream carries changes from subscription time onward; consumers
    /// list first to seed their mirror.
    async fn watch_cluster_states(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ClusterWatchStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_matches_subset() {
        let selector = LabelSelector::new(labels(&[("network", "mainnet")]));
        let object_labels = labels(&[("network", "mainnet"), ("region", "us-east-1")]);
        assert!(selector.matches(&object_labels));
    }

    #[test]
    fn test_selector_rejects_mismatch() {
        let selector = LabelSelector::new(labels(&[("network", "mainnet"), ("pool-id", "a")]));
        let object_labels = labels(&[("network", "mainnet"), ("pool-id", "b")]);
        assert!(!selector.matches(&object_labels));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector.matches(&labels(&[("anything", "goes")])));
        assert!(selector.is_empty());
    }
}
