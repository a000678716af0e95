//! Cluster state object model.
//!
//! One declarative record per cluster. The spec side is operator-authored
//! (GitOps); the status side is computed and written by the current local
//! leader. Peers discover each other through the identification labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired forging posture of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForgeState {
    /// Always forge, regardless of peers
    Enabled,
    /// Never forge
    Disabled,
    /// Forge iff this cluster wins the priority comparison
    #[serde(rename = "Priority-based")]
    PriorityBased,
}

impl Default for ForgeState {
    fn default() -> Self {
        ForgeState::PriorityBased
    }
}

impl ForgeState {
    /// Stable label for logs and status fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForgeState::Enabled => "Enabled",
            ForgeState::Disabled => "Disabled",
            ForgeState::PriorityBased => "Priority-based",
        }
    }
}

/// Health probing configuration for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    /// Whether the prober runs
    pub enabled: bool,

    /// Endpoint probed each interval
    pub endpoint: String,

    /// Probe interval in seconds
    pub interval_seconds: u64,

    /// Per-probe timeout in seconds
    pub timeout_seconds: u64,

    /// Consecutive failures before the cluster counts as unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            interval_seconds: 30,
            timeout_seconds: 5,
            failure_threshold: 3,
        }
    }
}

/// Operator override of the declared state and priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSpec {
    /// Whether the override is armed
    pub enabled: bool,

    /// Human-readable justification
    #[serde(default)]
    pub reason: String,

    /// Expiry; an expired override is inactive even while `enabled`
    pub expires_at: Option<DateTime<Utc>>,

    /// Forced forge state
    pub force_state: Option<ForgeState>,

    /// Forced priority
    pub force_priority: Option<i32>,
}

impl OverrideSpec {
    /// Whether the override applies at the given instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

/// Desired state of a cluster, authored externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Declared forge state
    #[serde(default)]
    pub forge_state: ForgeState,

    /// Declared priority, 1 = highest
    pub priority: i32,

    /// Health probing configuration
    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// Operator override
    #[serde(default, rename = "override")]
    pub override_spec: OverrideSpec,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            forge_state: ForgeState::default(),
            priority: 100,
            health_check: HealthCheckSpec::default(),
            override_spec: OverrideSpec::default(),
        }
    }
}

/// Observed health of a cluster, written by its local leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Whether the cluster currently counts as healthy
    pub healthy: bool,

    /// Consecutive failed probes
    pub consecutive_failures: u32,

    /// When the last probe ran
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last probe outcome description
    #[serde(default)]
    pub message: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_probe_time: None,
            message: String::new(),
        }
    }
}

/// A single observed condition on a cluster state object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. `Healthy`, `Forging`)
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Whether the condition holds
    pub status: bool,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// When the condition last flipped
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Build a condition stamped now.
    pub fn new(
        condition_type: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Computed state of a cluster, written by its local leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Effective forge state after overrides
    pub effective_state: ForgeState,

    /// Effective priority after overrides and health demotion
    pub effective_priority: i32,

    /// Pod currently leading this cluster, empty when none
    #[serde(default)]
    pub active_leader: String,

    /// Whether this cluster's leader is forging
    pub forging_enabled: bool,

    /// Observed health
    #[serde(default)]
    pub health_status: HealthStatus,

    /// When the forging decision last changed
    pub last_transition: Option<DateTime<Utc>>,

    /// Spec generation this status reflects
    pub observed_generation: i64,

    /// Observed conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Default for ClusterStatus {
    fn default() -> Self {
        Self {
            effective_state: ForgeState::default(),
            effective_priority: 0,
            active_leader: String::new(),
            forging_enabled: false,
            health_status: HealthStatus::default(),
            last_transition: None,
            observed_generation: 0,
            conditions: Vec::new(),
        }
    }
}

/// Object metadata carried by every cluster state object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name: `{network}-{poolIdShort}-{region}`
    pub name: String,

    /// Namespace the object lives in
    pub namespace: String,

    /// Identification labels used for peer discovery
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Creation time, used as the arbitration tie-break
    pub creation_timestamp: DateTime<Utc>,

    /// Spec generation, bumped on every spec change
    pub generation: i64,

    /// Opaque version token for optimistic concurrency
    pub resource_version: u64,
}

/// A cluster's declarative record: metadata, operator spec, computed status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStateObject {
    /// Object metadata
    pub metadata: ObjectMeta,

    /// Desired state
    pub spec: ClusterSpec,

    /// Observed state
    #[serde(default)]
    pub status: ClusterStatus,
}

impl ClusterStateObject {
    /// Build a fresh object with the identification labels.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        labels: BTreeMap<String, String>,
        spec: ClusterSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                labels,
                creation_timestamp: Utc::now(),
                generation: 1,
                resource_version: 0,
            },
            spec,
            status: ClusterStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_forge_state_serde_names() {
        assert_eq!(
            serde_json::to_string(&ForgeState::PriorityBased).unwrap(),
            "\"Priority-based\""
        );
        assert_eq!(
            serde_json::from_str::<ForgeState>("\"Enabled\"").unwrap(),
            ForgeState::Enabled
        );
    }

    #[test]
    fn test_override_expiry() {
        let now = Utc::now();

        let mut override_spec = OverrideSpec {
            enabled: true,
            expires_at: Some(now + Duration::minutes(5)),
            ..Default::default()
        };
        assert!(override_spec.is_active(now));

        // Expired overrides are inactive even while enabled.
        override_spec.expires_at = Some(now - Duration::minutes(5));
        assert!(!override_spec.is_active(now));

        override_spec.enabled = false;
        override_spec.expires_at = Some(now + Duration::minutes(5));
        assert!(!override_spec.is_active(now));
    }

    #[test]
    fn test_override_without_expiry_stays_active() {
        let override_spec = OverrideSpec {
            enabled: true,
            expires_at: None,
            ..Default::default()
        };
        assert!(override_spec.is_active(Utc::now()));
    }

    #[test]
    fn test_cluster_spec_round_trip() {
        let spec = ClusterSpec {
            forge_state: ForgeState::PriorityBased,
            priority: 7,
            ..Default::default()
        };

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"forgeState\""));
        assert!(json.contains("\"override\""));

        let back: ClusterSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.priority, 7);
        assert_eq!(back.forge_state, ForgeState::PriorityBased);
    }
}
