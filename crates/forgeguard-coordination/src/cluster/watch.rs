//! Peer-state mirror and the watch loop that feeds it.

use crate::cluster::state::{ClusterStateObject, ForgeState};
use crate::store::{ClusterWatchEvent, CoordinationStore, LabelSelector};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One peer cluster as mirrored from the store.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Peer object name
    pub name: String,

    /// Peer's effective forge state
    pub effective_state: ForgeState,

    /// Peer's effective priority
    pub effective_priority: i32,

    /// Peer's consecutive health-probe failures
    pub consecutive_failures: u32,

    /// Peer's configured failure threshold
    pub failure_threshold: u32,

    /// Peer object creation time, used for tie-breaks
    pub creation_timestamp: DateTime<Utc>,

    /// When this entry was last refreshed
    pub last_seen: DateTime<Utc>,
}

impl PeerEntry {
    /// Mirror a store object. Falls back to the spec values while the peer's
    /// leader has not yet written a status.
    pub fn from_object(object: &ClusterStateObject, now: DateTime<Utc>) -> Self {
        let status_written = object.status.observed_generation > 0;
        Self {
            name: object.metadata.name.clone(),
            effective_state: if status_written {
                object.status.effective_state
            } else {
                object.spec.forge_state
            },
            effective_priority: if status_written {
                object.status.effective_priority
            } else {
                object.spec.priority
            },
            consecutive_failures: object.status.health_status.consecutive_failures,
            failure_threshold: object.spec.health_check.failure_threshold,
            creation_timestamp: object.metadata.creation_timestamp,
            last_seen: now,
        }
    }

    /// Whether this entry is too old to trust for arbitration.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        match chrono::Duration::from_std(staleness) {
            Ok(window) => now - self.last_seen > window,
            Err(_) => false,
        }
    }
}

/// Shared in-memory mirror of peer cluster state objects, keyed by name.
pub struct PeerMirror {
    entries: RwLock<HashMap<String, PeerEntry>>,
    synced: AtomicBool,
}

impl PeerMirror {
    /// Create an empty, unsynced mirror.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Whether an initial list resync has completed.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Snapshot the current peer entries.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Replace the mirror with a freshly listed set, excluding self.
    pub fn replace_all(&self, objects: &[ClusterStateObject], self_name: &str) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.clear();
        for object in objects {
            if object.metadata.name == self_name {
                continue;
            }
            entries.insert(
                object.metadata.name.clone(),
                PeerEntry::from_object(object, now),
            );
        }
        drop(entries);
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Fold a single watch event into the mirror, excluding self.
    pub fn apply_event(&self, event: &ClusterWatchEvent, self_name: &str) {
        let object = event.object();
        if object.metadata.name == self_name {
            return;
        }

        let mut entries = self.entries.write();
        match event {
            ClusterWatchEvent::Added(_) | ClusterWatchEvent::Modified(_) => {
                entries.insert(
                    object.metadata.name.clone(),
                    PeerEntry::from_object(object, Utc::now()),
                );
            }
            ClusterWatchEvent::Deleted(_) => {
                entries.remove(&object.metadata.name);
            }
        }
    }
}

impl Default for PeerMirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task keeping the [`PeerMirror`] converged with the store.
///
/// Each cycle lists the tenant's objects to resync the mirror, then consumes
/// the watch stream until it fails or ends; interruptions reconnect with
/// exponential backoff capped at thirty seconds.
pub struct PeerWatcher {
    store: Arc<dyn CoordinationStore>,
    namespace: String,
    selector: LabelSelector,
    self_name: String,
    mirror: Arc<PeerMirror>,
}

impl PeerWatcher {
    /// Create a watcher feeding the given mirror.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespace: impl Into<String>,
        selector: LabelSelector,
        self_name: impl Into<String>,
        mirror: Arc<PeerMirror>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            selector,
            self_name: self_name.into(),
            mirror,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self
                .store
                .list_cluster_states(&self.namespace, &self.selector)
                .await
            {
                Ok(objects) => {
                    self.mirror.replace_all(&objects, &self.self_name);
                    debug!(peers = objects.len(), "Peer mirror resynced");
                    backoff = INITIAL_BACKOFF;
                }
                Err(err) => {
                    warn!(error = %err, "Peer list failed; backing off");
                    if sleep_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            }

            let mut stream = match self
                .store
                .watch_cluster_states(&self.namespace, &self.selector)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "Peer watch failed to open; backing off");
                    if sleep_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Peer watcher shutting down");
                            return;
                        }
                    }
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            self.mirror.apply_event(&event, &self.self_name);
                            backoff = INITIAL_BACKOFF;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Peer watch interrupted; resyncing");
                            break;
                        }
                        None => {
                            debug!("Peer watch stream ended; resyncing");
                            break;
                        }
                    }
                }
            }

            if sleep_or_shutdown(&mut shutdown, backoff).await {
                break;
            }
            backoff = next_backoff(backoff);
        }

        info!("Peer watcher stopped");
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Sleep for `duration`, returning true when shutdown fired first. A closed
/// channel counts as shutdown.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
