//! Metric names and registration.
//!
//! All metrics go through the `metrics` facade; the binary installs a
//! Prometheus recorder and the HTTP layer renders it at `/metrics`.

use ::metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::Once;

/// 1 while this replica's credentials are present and it may forge.
pub const FORGING_ENABLED: &str = "forging_enabled";

/// 1 while this replica holds the lease.
pub const LEADER_STATUS: &str = "leader_status";

/// 1 while the cluster arbiter permits local forging.
pub const CLUSTER_FORGE_ENABLED: &str = "cluster_forge_enabled";

/// Effective priority of the local cluster.
pub const CLUSTER_FORGE_PRIORITY: &str = "cluster_forge_priority";

/// Leadership verdict flips observed by the election engine.
pub const LEADERSHIP_CHANGES_TOTAL: &str = "leadership_changes_total";

/// Per-file credential operations, labelled by operation and file.
pub const CREDENTIAL_OPERATIONS_TOTAL: &str = "credential_operations_total";

/// Reload signals delivered to the node, labelled by reason.
pub const SIGHUP_SIGNALS_TOTAL: &str = "sighup_signals_total";

/// Reload signals skipped because the node PID is unknown.
pub const SIGHUP_SIGNALS_SKIPPED_TOTAL: &str = "sighup_signals_skipped_total";

/// Node present→absent transitions.
pub const NODE_FAILURE_EVENTS_TOTAL: &str = "node_failure_events_total";

/// Failed cluster health probes.
pub const CLUSTER_HEALTH_PROBE_FAILURES_TOTAL: &str = "cluster_health_probe_failures_total";

/// Fatal startup errors, emitted before a non-zero exit.
pub const STARTUP_FAILURES_TOTAL: &str = "startup_failures_total";

static REGISTER: Once = Once::new();

/// Register metric descriptions. Idempotent.
pub fn register() {
    REGISTER.call_once(|| {
        describe_gauge!(FORGING_ENABLED, "Whether this replica is forging");
        describe_gauge!(LEADER_STATUS, "Whether this replica holds the lease");
        describe_gauge!(
            CLUSTER_FORGE_ENABLED,
            "Whether the cluster arbiter permits local forging"
        );
        describe_gauge!(
            CLUSTER_FORGE_PRIORITY,
            "Effective priority of the local cluster"
        );
        describe_counter!(LEADERSHIP_CHANGES_TOTAL, "Leadership verdict flips");
        describe_counter!(
            CREDENTIAL_OPERATIONS_TOTAL,
            "Credential file operations by operation and file"
        );
        describe_counter!(SIGHUP_SIGNALS_TOTAL, "Reload signals sent to the node");
        describe_counter!(
            SIGHUP_SIGNALS_SKIPPED_TOTAL,
            "Reload signals skipped because the node PID is unknown"
        );
        describe_counter!(NODE_FAILURE_EVENTS_TOTAL, "Node present-to-absent events");
        describe_counter!(
            CLUSTER_HEALTH_PROBE_FAILURES_TOTAL,
            "Failed cluster health probes"
        );
        describe_counter!(STARTUP_FAILURES_TOTAL, "Fatal startup errors");
    });
}

/// Record one per-file credential operation.
pub fn record_credential_operation(operation: &'static str, file: &'static str) {
    counter!(CREDENTIAL_OPERATIONS_TOTAL, "operation" => operation, "file" => file).increment(1);
}

/// Record a delivered reload signal.
pub fn record_signal(reason: &'static str) {
    counter!(SIGHUP_SIGNALS_TOTAL, "reason" => reason).increment(1);
}

/// Record a skipped reload signal.
pub fn record_signal_skipped() {
    counter!(SIGHUP_SIGNALS_SKIPPED_TOTAL).increment(1);
}

/// Record a node failure event.
pub fn record_node_failure() {
    counter!(NODE_FAILURE_EVENTS_TOTAL).increment(1);
}

/// Record one leadership verdict flip.
pub fn record_leadership_change() {
    counter!(LEADERSHIP_CHANGES_TOTAL).increment(1);
}

/// Record a fatal startup error.
pub fn record_startup_failure() {
    counter!(STARTUP_FAILURES_TOTAL).increment(1);
}

/// Update the per-tick gauges.
pub fn set_tick_gauges(is_leader: bool, forging: bool) {
    gauge!(LEADER_STATUS).set(if is_leader { 1.0 } else { 0.0 });
    gauge!(FORGING_ENABLED).set(if forging { 1.0 } else { 0.0 });
}

/// Update the cluster arbitration gauges.
pub fn set_cluster_gauges(allowed: bool, effective_priority: Option<i32>) {
    gauge!(CLUSTER_FORGE_ENABLED).set(if allowed { 1.0 } else { 0.0 });
    if let Some(priority) = effective_priority {
        gauge!(CLUSTER_FORGE_PRIORITY).set(priority as f64);
    }
}
