//! Cluster health probing.

use crate::cluster::state::HealthStatus;
use crate::error::Result;
use crate::store::CoordinationStore;
use chrono::Utc;
use metrics::counter;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared, lock-guarded mirror of the local cluster's probe results.
///
/// Writer is the prober task; readers are the arbiter and the status-writer
/// paths. Readers copy a snapshot out and act without the lock.
pub struct HealthState {
    inner: RwLock<HealthStatus>,
}

impl HealthState {
    /// Create a nominal (healthy, zero failures) state.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HealthStatus::default()),
        }
    }

    /// Copy the current state out.
    pub fn snapshot(&self) -> HealthStatus {
        self.inner.read().clone()
    }

    /// Record a successful probe.
    pub fn record_success(&self) {
        let mut state = self.inner.write();
        state.healthy = true;
        state.consecutive_failures = 0;
        state.last_probe_time = Some(Utc::now());
        state.message = "probe succeeded".to_string();
    }

    /// Record a failed probe; returns the new consecutive-failure count.
    pub fn record_failure(&self, failure_threshold: u32, message: impl Into<String>) -> u32 {
        let mut state = self.inner.write();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= failure_threshold {
            state.healthy = false;
        }
        state.last_probe_time = Some(Utc::now());
        state.message = message.into();
        state.consecutive_failures
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task probing the cluster health endpoint.
///
/// A 2xx response resets the failure counter; anything else (bad status or
/// transport error) increments it. The cluster object's status is updated
/// only while this replica leads; otherwise results stay in the local mirror.
/// Probe errors never terminate the loop.
pub struct HealthProber {
    client: reqwest::Client,
    endpoint: String,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    state: Arc<HealthState>,
    store: Arc<dyn CoordinationStore>,
    namespace: String,
    object_name: Option<String>,
    leader_flag: Arc<AtomicBool>,
}

impl HealthProber {
    /// Create a prober for the given endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        failure_threshold: u32,
        state: Arc<HealthState>,
        store: Arc<dyn CoordinationStore>,
        namespace: impl Into<String>,
        object_name: Option<String>,
        leader_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            interval,
            timeout,
            failure_threshold,
            state,
            store,
            namespace: namespace.into(),
            object_name,
            leader_flag,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(endpoint = %self.endpoint, "Health prober started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health prober shutting down");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
            }
        }
    }

    /// Issue one probe and fold the outcome into the mirror.
    pub async fn probe_once(&self) {
        let result = self
            .client
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.state.record_success();
            }
            Ok(response) => {
                let failures = self.state.record_failure(
                    self.failure_threshold,
                    format!("probe returned {}", response.status()),
                );
                counter!("cluster_health_probe_failures_total").increment(1);
                warn!(
                    endpoint = %self.endpoint,
                    status = %response.status(),
                    consecutive_failures = failures,
                    "Health probe failed"
                );
            }
            Err(err) => {
                let failures = self
                    .state
                    .record_failure(self.failure_threshold, format!("probe error: {}", err));
                counter!("cluster_health_probe_failures_total").increment(1);
                warn!(
                    endpoint = %self.endpoint,
                    error = %err,
                    consecutive_failures = failures,
                    "Health probe failed"
                );
            }
        }

        if self.leader_flag.load(Ordering::SeqCst) {
            if let Err(err) = self.publish_health().await {
                debug!(error = %err, "Health status write skipped");
            }
        }
    }

    /// Write the probe mirror into the cluster object's status (leader only).
    async fn publish_health(&self) -> Result<()> {
        let Some(name) = &self.object_name else {
            return Ok(());
        };

        let object = self.store.get_cluster_state(&self.namespace, name).await?;
        let mut status = object.status.clone();
        status.health_status = self.state.snapshot();
        self.store
            .patch_cluster_status(&self.namespace, name, status)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_accumulation_and_threshold() {
        let state = HealthState::new();
        assert!(state.snapshot().healthy);

        assert_eq!(state.record_failure(3, "down"), 1);
        assert!(state.snapshot().healthy);

        state.record_failure(3, "down");
        assert_eq!(state.record_failure(3, "down"), 3);
        assert!(!state.snapshot().healthy);
    }

    #[test]
    fn test_success_resets_failures() {
        let state = HealthState::new();
        state.record_failure(3, "down");
        state.record_failure(3, "down");

        state.record_success();
        let snapshot = state.snapshot();
        assert!(snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_probe_time.is_some());
    }
}
