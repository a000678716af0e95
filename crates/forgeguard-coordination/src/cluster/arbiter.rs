//! Cross-cluster forge arbitration.
//!
//! Each cluster independently publishes its spec and status and consumes its
//! peers' to decide whether it may forge. There is no leader-of-leaders; the
//! design accepts a bounded split-brain window during propagation in exchange
//! for partition tolerance. Evaluation failures deny forging: a brief forging
//! gap is preferred over dual-forging.

use crate::cluster::health::HealthState;
use crate::cluster::state::{
    ClusterSpec, ClusterStateObject, ClusterStatus, Condition, ForgeState, HealthStatus,
};
use crate::cluster::watch::{PeerEntry, PeerMirror};
use crate::error::{CoordinationError, Result};
use crate::store::{CoordinationStore, LabelSelector};
use chrono::{DateTime, Utc};
use forgeguard_core::ReplicaIdentity;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Verdict of one arbitration pass.
#[derive(Debug, Clone)]
pub struct ForgeDecision {
    /// Whether this cluster may forge
    pub allow: bool,

    /// Machine-readable reason
    pub reason: String,

    /// Effective priority at decision time; absent when evaluation failed
    pub effective_priority: Option<i32>,
}

impl ForgeDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
            effective_priority: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            effective_priority: None,
        }
    }

    fn with_priority(mut self, priority: i32) -> Self {
        self.effective_priority = Some(priority);
        self
    }
}

/// Compute the effective state and priority of a cluster.
///
/// Unexpired overrides apply first; health demotion applies only in
/// priority-based state: +100 at or past the failure threshold, +10 from the
/// first failure.
pub fn effective_state_and_priority(
    spec: &ClusterSpec,
    health: &HealthStatus,
    now: DateTime<Utc>,
) -> (ForgeState, i32) {
    let mut state = spec.forge_state;
    let mut priority = spec.priority;

    if spec.override_spec.is_active(now) {
        if let Some(forced) = spec.override_spec.force_state {
            state = forced;
        }
        if let Some(forced) = spec.override_spec.force_priority {
            priority = forced;
        }
    }

    if state == ForgeState::PriorityBased && health.consecutive_failures >= 1 {
        if health.consecutive_failures >= spec.health_check.failure_threshold {
            priority += 100;
        } else {
            priority += 10;
        }
    }

    (state, priority)
}

/// Decides whether this cluster is permitted to forge.
pub struct ClusterArbiter {
    store: Arc<dyn CoordinationStore>,
    identity: ReplicaIdentity,
    seed_spec: ClusterSpec,
    health: Arc<HealthState>,
    mirror: Arc<PeerMirror>,
    staleness: Duration,
}

impl ClusterArbiter {
    /// Create an arbiter.
    ///
    /// `seed_spec` is used to create the cluster state object when absent;
    /// it never overwrites an externally-authored spec. The staleness window
    /// is three health-check intervals.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: ReplicaIdentity,
        seed_spec: ClusterSpec,
        health: Arc<HealthState>,
        mirror: Arc<PeerMirror>,
    ) -> Self {
        let staleness =
            Duration::from_secs(seed_spec.health_check.interval_seconds.saturating_mul(3));
        Self {
            store,
            identity,
            seed_spec,
            health,
            mirror,
            staleness,
        }
    }

    /// Name of this cluster's state object, when a full tenant tuple exists.
    pub fn object_name(&self) -> Option<String> {
        self.identity.cluster_object_name()
    }

    /// Selector matching this tenant's cluster state objects.
    pub fn peer_selector(&self) -> LabelSelector {
        LabelSelector::new(self.identity.peer_selector())
    }

    /// Ensure this cluster's state object exists, creating it with the seed
    /// spec and identification labels when missing.
    pub async fn ensure_cluster_state(&self) -> Result<()> {
        let Some(name) = self.object_name() else {
            return Ok(());
        };

        match self
            .store
            .get_cluster_state(&self.identity.namespace, &name)
            .await
        {
            Ok(_) => Ok(()),
            Err(CoordinationError::NotFound(_)) => {
                let object = ClusterStateObject::new(
                    name.clone(),
                    self.identity.namespace.clone(),
                    self.identity.tenant_labels(),
                    self.seed_spec.clone(),
                );
                match self
                    .store
                    .create_cluster_state(&self.identity.namespace, object)
                    .await
                {
                    Ok(_) => {
                        info!(object = %name, "Created cluster state object");
                        Ok(())
                    }
                    Err(CoordinationError::AlreadyExists(_)) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Decide whether this cluster may forge. Never fails: evaluation errors
    /// deny with reason `evaluation_error`.
    pub async fn should_allow_local_forging(&self) -> ForgeDecision {
        match self.evaluate().await {
            Ok(decision) => {
                debug!(
                    allow = decision.allow,
                    reason = %decision.reason,
                    "Arbitration evaluated"
                );
                decision
            }
            Err(err) => {
                error!(error = %err, "Arbitration evaluation failed; denying forging");
                ForgeDecision::deny("evaluation_error")
            }
        }
    }

    async fn evaluate(&self) -> Result<ForgeDecision> {
        let Some(name) = self.object_name() else {
            return Ok(ForgeDecision::allow("legacy_single_tenant"));
        };

        let now = Utc::now();
        let own = match self
            .store
            .get_cluster_state(&self.identity.namespace, &name)
            .await
        {
            Ok(object) => object,
            // Not created yet; evaluate against the seed spec.
            Err(CoordinationError::NotFound(_)) => ClusterStateObject::new(
                name.clone(),
                self.identity.namespace.clone(),
                self.identity.tenant_labels(),
                self.seed_spec.clone(),
            ),
            Err(err) => return Err(err),
        };

        let health = self.health.snapshot();
        let (effective_state, effective_priority) =
            effective_state_and_priority(&own.spec, &health, now);

        match effective_state {
            ForgeState::Disabled => {
                Ok(ForgeDecision::deny("cluster_forge_disabled").with_priority(effective_priority))
            }
            ForgeState::Enabled => {
                Ok(ForgeDecision::allow("cluster_forge_enabled").with_priority(effective_priority))
            }
            ForgeState::PriorityBased => {
                let peers = self.discover_peers(&name, now).await?;
                Ok(self
                    .compare_with_peers(&own, effective_priority, &peers, now)
                    .with_priority(effective_priority))
            }
        }
    }

    /// Enumerate peer states: the watch mirror once synced, a direct list
    /// before that.
    async fn discover_peers(&self, self_name: &str, now: DateTime<Utc>) -> Result<Vec<PeerEntry>> {
        if self.mirror.is_synced() {
            return Ok(self.mirror.snapshot());
        }

        let listed = self
            .store
            .list_cluster_states(&self.identity.namespace, &self.peer_selector())
            .await?;

        Ok(listed
            .iter()
            .filter(|object| object.metadata.name != self_name)
            .map(|object| PeerEntry::from_object(object, now))
            .collect())
    }

    fn compare_with_peers(
        &self,
        own: &ClusterStateObject,
        effective_priority: i32,
        peers: &[PeerEntry],
        now: DateTime<Utc>,
    ) -> ForgeDecision {
        let eligible: Vec<&PeerEntry> = peers
            .iter()
            .filter(|peer| {
                peer.effective_state != ForgeState::Disabled
                    && peer.consecutive_failures < peer.failure_threshold
                    && !peer.is_stale(now, self.staleness)
            })
            .collect();

        if eligible.is_empty() {
            return ForgeDecision::allow("sole_or_all_peers_ineligible");
        }

        for peer in eligible {
            if peer.effective_priority < effective_priority {
                return ForgeDecision::deny(format!("deferring_to_peer_{}", peer.name));
            }
            if peer.effective_priority == effective_priority {
                // Tie-break: older object wins, then lexicographic name.
                let peer_wins = match peer
                    .creation_timestamp
                    .cmp(&own.metadata.creation_timestamp)
                {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => peer.name < own.metadata.name,
                };
                if peer_wins {
                    return ForgeDecision::deny(format!("deferring_to_peer_{}", peer.name));
                }
            }
        }

        ForgeDecision::allow(format!("highest_priority_{}", effective_priority))
    }

    /// Write this cluster's computed status. Called by the supervisor while
    /// it holds local leadership.
    pub async fn report_local_leader(&self, pod_name: &str, forging_enabled: bool) -> Result<()> {
        let Some(name) = self.object_name() else {
            return Ok(());
        };

        let own = self
            .store
            .get_cluster_state(&self.identity.namespace, &name)
            .await?;

        let now = Utc::now();
        let health = self.health.snapshot();
        let (effective_state, effective_priority) =
            effective_state_and_priority(&own.spec, &health, now);

        let changed = own.status.forging_enabled != forging_enabled
            || own.status.effective_state != effective_state;

        let healthy_reason = if health.healthy {
            "ProbesPassing"
        } else {
            "ProbesFailing"
        };
        let forging_reason = if forging_enabled {
            "LeaderForging"
        } else {
            "Standby"
        };

        let status = ClusterStatus {
            effective_state,
            effective_priority,
            active_leader: pod_name.to_string(),
            forging_enabled,
            health_status: health.clone(),
            last_transition: if changed {
                Some(now)
            } else {
                own.status.last_transition
            },
            observed_generation: own.metadata.generation,
            conditions: vec![
                Condition::new("Healthy", health.healthy, healthy_reason, health.message),
                Condition::new("Forging", forging_enabled, forging_reason, ""),
            ],
        };

        self.store
            .patch_cluster_status(&self.identity.namespace, &name, status)
            .await?;
        Ok(())
    }
}
