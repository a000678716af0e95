//! In-process coordination store.
//!
//! Backs single-API-plane deployments and every integration test. Versions
//! are a process-wide monotonic counter; watches fan out over a broadcast
//! channel, so subscribers observe changes from subscription time onward.

use crate::cluster::state::{ClusterSpec, ClusterStateObject, ClusterStatus};
use crate::error::{CoordinationError, Result};
use crate::lease::LeaseRecord;
use crate::status::ForgeStatus;
use crate::store::{ClusterWatchEvent, ClusterWatchStream, CoordinationStore, LabelSelector};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

type Key = (String, String);

const WATCH_CHANNEL_CAPACITY: usize = 256;

/// In-memory implementation of [`CoordinationStore`].
pub struct MemoryStore {
    leases: RwLock<HashMap<Key, LeaseRecord>>,
    statuses: RwLock<HashMap<Key, ForgeStatus>>,
    clusters: RwLock<HashMap<Key, ClusterStateObject>>,
    next_version: AtomicU64,
    events: broadcast::Sender<ClusterWatchEvent>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            leases: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            clusters: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            events,
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: ClusterWatchEvent) {
        // No receivers is fine; watches are optional.
        let _ = self.events.send(event);
    }

    /// Remove a cluster state object, emitting a Deleted event. Test helper
    /// for partition and teardown scenarios.
    pub fn delete_cluster_state(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let removed = self.clusters.write().remove(&key);
        match removed {
            Some(object) => {
                self.emit(ClusterWatchEvent::Deleted(object));
                Ok(())
            }
            None => Err(CoordinationError::NotFound(name.to_string())),
        }
    }

    /// Remove a lease. Test helper for tenant-teardown scenarios.
    pub fn delete_lease(&self, namespace: &str, name: &str) {
        self.leases
            .write()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_lease(&self, namespace: &str, name: &str) -> Result<LeaseRecord> {
        self.leases
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(name.to_string()))
    }

    async fn create_lease(&self, namespace: &str, mut lease: LeaseRecord) -> Result<LeaseRecord> {
        let key = (namespace.to_string(), lease.name.clone());
        let mut leases = self.leases.write();
        if leases.contains_key(&key) {
            return Err(CoordinationError::AlreadyExists(lease.name));
        }
        lease.version = self.bump_version();
        leases.insert(key, lease.clone());
        Ok(lease)
    }

    async fn update_lease(&self, namespace: &str, mut lease: LeaseRecord) -> Result<LeaseRecord> {
        let key = (namespace.to_string(), lease.name.clone());
        let mut leases = self.leases.write();
        let stored = leases
            .get(&key)
            .ok_or_else(|| CoordinationError::NotFound(lease.name.clone()))?;

        if stored.version != lease.version {
            return Err(CoordinationError::Conflict(lease.name));
        }

        lease.version = self.bump_version();
        leases.insert(key, lease.clone());
        Ok(lease)
    }

    async fn get_forge_status(&self, namespace: &str, name: &str) -> Result<ForgeStatus> {
        self.statuses
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(name.to_string()))
    }

    async fn upsert_forge_status(
        &self,
        namespace: &str,
        name: &str,
        status: ForgeStatus,
    ) -> Result<()> {
        self.statuses
            .write()
            .insert((namespace.to_string(), name.to_string()), status);
        Ok(())
    }

    async fn clear_forge_status(&self, namespace: &str, name: &str) -> Result<()> {
        self.statuses
            .write()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_cluster_state(&self, namespace: &str, name: &str) -> Result<ClusterStateObject> {
        self.clusters
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(name.to_string()))
    }

    async fn create_cluster_state(
        &self,
        namespace: &str,
        mut object: ClusterStateObject,
    ) -> Result<ClusterStateObject> {
        object.metadata.namespace = namespace.to_string();
        let key = (namespace.to_string(), object.metadata.name.clone());

        {
            let mut clusters = self.clusters.write();
            if clusters.contains_key(&key) {
                return Err(CoordinationError::AlreadyExists(object.metadata.name));
            }
            object.metadata.resource_version = self.bump_version();
            clusters.insert(key, object.clone());
        }

        self.emit(ClusterWatchEvent::Added(object.clone()));
        Ok(object)
    }

    async fn update_cluster_spec(
        &self,
        namespace: &str,
        name: &str,
        spec: ClusterSpec,
    ) -> Result<ClusterStateObject> {
        let key = (namespace.to_string(), name.to_string());
        let updated = {
            let mut clusters = self.clusters.write();
            let object = clusters
                .get_mut(&key)
                .ok_or_else(|| CoordinationError::NotFound(name.to_string()))?;
            object.spec = spec;
            object.metadata.generation += 1;
            object.metadata.resource_version = self.bump_version();
            object.clone()
        };

        self.emit(ClusterWatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn list_cluster_states(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterStateObject>> {
        let clusters = self.clusters.read();
        Ok(clusters
            .values()
            .filter(|obj| {
                obj.metadata.namespace == namespace && selector.matches(&obj.metadata.labels)
            })
            .cloned()
            .collect())
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: ClusterStatus,
    ) -> Result<ClusterStateObject> {
        let key = (namespace.to_string(), name.to_string());
        let updated = {
            let mut clusters = self.clusters.write();
            let object = clusters
                .get_mut(&key)
                .ok_or_else(|| CoordinationError::NotFound(name.to_string()))?;
            object.status = status;
            object.metadata.resource_version = self.bump_version();
            object.clone()
        };

        self.emit(ClusterWatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn watch_cluster_states(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ClusterWatchStream> {
        let receiver = self.events.subscribe();
        let namespace = namespace.to_string();
        let selector = selector.clone();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let mapped = match item {
                Ok(event) => {
                    let meta = &event.object().metadata;
                    if meta.namespace == namespace && selector.matches(&meta.labels) {
                        Some(Ok(event))
                    } else {
                        None
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Err(
                    CoordinationError::Unavailable(format!("watch lagged by {} events", skipped)),
                )),
            };
            futures::future::ready(mapped)
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::state::ForgeState;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn tenant_labels() -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("network".to_string(), "mainnet".to_string());
        labels.insert("pool-id".to_string(), "pool1abc".to_string());
        labels
    }

    fn cluster_object(name: &str) -> ClusterStateObject {
        ClusterStateObject::new(name, "default", tenant_labels(), ClusterSpec::default())
    }

    #[tokio::test]
    async fn test_lease_create_then_conflict_on_stale_version() {
        let store = MemoryStore::new();
        let lease =
            LeaseRecord::held_by("lease-a", "pod-0", Utc::now(), Duration::from_secs(15));

        let created = store.create_lease("default", lease.clone()).await.unwrap();
        assert!(created.version > 0);

        // A stale version loses the optimistic-concurrency race.
        let stale = lease;
        let err = store.update_lease("default", stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_lease_twice_fails() {
        let store = MemoryStore::new();
        let lease =
            LeaseRecord::held_by("lease-a", "pod-0", Utc::now(), Duration::from_secs(15));

        store.create_lease("default", lease.clone()).await.unwrap();
        let err = store.create_lease("default", lease).await.unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        store
            .create_cluster_state("default", cluster_object("mainnet-abc-us-east-1"))
            .await
            .unwrap();

        let mut other_labels = tenant_labels();
        other_labels.insert("pool-id".to_string(), "pool1xyz".to_string());
        store
            .create_cluster_state(
                "default",
                ClusterStateObject::new(
                    "mainnet-xyz-us-west-2",
                    "default",
                    other_labels,
                    ClusterSpec::default(),
                ),
            )
            .await
            .unwrap();

        let selector = LabelSelector::new(tenant_labels());
        let listed = store.list_cluster_states("default", &selector).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.name, "mainnet-abc-us-east-1");

        let elsewhere = store.list_cluster_states("other", &selector).await.unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_spec_update_bumps_generation() {
        let store = MemoryStore::new();
        store
            .create_cluster_state("default", cluster_object("mainnet-abc-us-east-1"))
            .await
            .unwrap();

        let mut spec = ClusterSpec::default();
        spec.forge_state = ForgeState::Disabled;
        let updated = store
            .update_cluster_spec("default", "mainnet-abc-us-east-1", spec)
            .await
            .unwrap();

        assert_eq!(updated.metadata.generation, 2);
        assert_eq!(updated.spec.forge_state, ForgeState::Disabled);
    }

    #[tokio::test]
    async fn test_watch_delivers_matching_events() {
        let store = MemoryStore::new();
        let selector = LabelSelector::new(tenant_labels());
        let mut watch = store.watch_cluster_states("default", &selector).await.unwrap();

        store
            .create_cluster_state("default", cluster_object("mainnet-abc-us-east-1"))
            .await
            .unwrap();

        let event = watch.next().await.unwrap().unwrap();
        assert!(matches!(event, ClusterWatchEvent::Added(_)));
        assert_eq!(event.object().metadata.name, "mainnet-abc-us-east-1");
    }

    #[tokio::test]
    async fn test_watch_skips_other_tenants() {
        let store = MemoryStore::new();
        let selector = LabelSelector::new(tenant_labels());
        let mut watch = store.watch_cluster_states("default", &selector).await.unwrap();

        let mut other_labels = BTreeMap::new();
        other_labels.insert("network".to_string(), "preprod".to_string());
        store
            .create_cluster_state(
                "default",
                ClusterStateObject::new(
                    "preprod-xyz-eu-west-1",
                    "default",
                    other_labels,
                    ClusterSpec::default(),
                ),
            )
            .await
            .unwrap();
        store
            .create_cluster_state("default", cluster_object("mainnet-abc-us-east-1"))
            .await
            .unwrap();

        // Only the matching tenant's event arrives.
        let event = watch.next().await.unwrap().unwrap();
        assert_eq!(event.object().metadata.name, "mainnet-abc-us-east-1");
    }
}
