//! Cross-cluster arbitration scenarios: manual failover and health demotion.

use forgeguard_coordination::{
    ClusterArbiter, ClusterSpec, CoordinationStore, ForgeState, HealthState, MemoryStore,
    PeerMirror, PeerWatcher,
};
use forgeguard_core::ReplicaIdentity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn identity(region: &str, pod: &str) -> ReplicaIdentity {
    ReplicaIdentity {
        pod_name: pod.to_string(),
        namespace: "default".to_string(),
        network: "mainnet".to_string(),
        pool_id: Some("pool1abcdefghijklmnop".to_string()),
        region: Some(region.to_string()),
        application: "block-producer".to_string(),
    }
}

fn spec(priority: i32) -> ClusterSpec {
    ClusterSpec {
        priority,
        ..Default::default()
    }
}

struct Cluster {
    arbiter: ClusterArbiter,
    health: Arc<HealthState>,
    object_name: String,
}

fn cluster(store: &Arc<MemoryStore>, region: &str, pod: &str, priority: i32) -> Cluster {
    let health = Arc::new(HealthState::new());
    let id = identity(region, pod);
    let object_name = id.cluster_object_name().unwrap();
    let arbiter = ClusterArbiter::new(
        Arc::clone(store) as Arc<dyn CoordinationStore>,
        id,
        spec(priority),
        Arc::clone(&health),
        Arc::new(PeerMirror::new()),
    );
    Cluster {
        arbiter,
        health,
        object_name,
    }
}

#[tokio::test]
async fn test_manual_failover_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let primary = cluster(&store, "us-east-1", "pod-a", 1);
    let secondary = cluster(&store, "eu-west-1", "pod-b", 2);

    primary.arbiter.ensure_cluster_state().await.unwrap();
    secondary.arbiter.ensure_cluster_state().await.unwrap();

    assert!(primary.arbiter.should_allow_local_forging().await.allow);
    assert!(!secondary.arbiter.should_allow_local_forging().await.allow);

    // Operator disables the primary cluster.
    let mut disabled = spec(1);
    disabled.forge_state = ForgeState::Disabled;
    store
        .update_cluster_spec("default", &primary.object_name, disabled)
        .await
        .unwrap();
    primary.arbiter.report_local_leader("pod-a", false).await.unwrap();

    let primary_decision = primary.arbiter.should_allow_local_forging().await;
    assert!(!primary_decision.allow);
    assert_eq!(primary_decision.reason, "cluster_forge_disabled");
    assert!(secondary.arbiter.should_allow_local_forging().await.allow);

    // Revert: the primary regains the forge on priority.
    store
        .update_cluster_spec("default", &primary.object_name, spec(1))
        .await
        .unwrap();
    primary.arbiter.report_local_leader("pod-a", true).await.unwrap();

    assert!(primary.arbiter.should_allow_local_forging().await.allow);
    assert!(!secondary.arbiter.should_allow_local_forging().await.allow);
}

#[tokio::test]
async fn test_health_demotion_moves_the_forge() {
    let store = Arc::new(MemoryStore::new());
    let primary = cluster(&store, "us-east-1", "pod-a", 1);
    let secondary = cluster(&store, "eu-west-1", "pod-b", 2);

    primary.arbiter.ensure_cluster_state().await.unwrap();
    secondary.arbiter.ensure_cluster_state().await.unwrap();

    assert!(primary.arbiter.should_allow_local_forging().await.allow);

    // Primary's probes fail past the threshold; its leader publishes the
    // demoted priority.
    for _ in 0..3 {
        primary.health.record_failure(3, "endpoint returned 503");
    }
    primary.arbiter.report_local_leader("pod-a", true).await.unwrap();

    // The primary now computes effective priority 101 and defers; the
    // secondary sees an unhealthy peer and takes over.
    let primary_decision = primary.arbiter.should_allow_local_forging().await;
    assert!(!primary_decision.allow);

    let secondary_decision = secondary.arbiter.should_allow_local_forging().await;
    assert!(secondary_decision.allow);
    assert_eq!(secondary_decision.reason, "sole_or_all_peers_ineligible");

    // Probes recover; the primary resumes.
    primary.health.record_success();
    primary.arbiter.report_local_leader("pod-a", false).await.unwrap();

    assert!(primary.arbiter.should_allow_local_forging().await.allow);
    assert!(!secondary.arbiter.should_allow_local_forging().await.allow);
}

#[tokio::test]
async fn test_peer_watcher_keeps_mirror_converged() {
    let store = Arc::new(MemoryStore::new());
    let primary = cluster(&store, "us-east-1", "pod-a", 1);
    let secondary = cluster(&store, "eu-west-1", "pod-b", 2);

    primary.arbiter.ensure_cluster_state().await.unwrap();
    secondary.arbiter.ensure_cluster_state().await.unwrap();

    let mirror = Arc::new(PeerMirror::new());
    let watcher = PeerWatcher::new(
        Arc::clone(&store) as Arc<dyn CoordinationStore>,
        "default",
        primary.arbiter.peer_selector(),
        primary.object_name.clone(),
        Arc::clone(&mirror),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(watcher.run(shutdown_rx));

    // Initial list resync picks up the secondary.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mirror.is_synced());
    let snapshot = mirror.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name, secondary.object_name);

    // A status write by the secondary's leader flows through the watch.
    secondary.arbiter.report_local_leader("pod-b", false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = mirror.snapshot();
    assert_eq!(snapshot[0].effective_priority, 2);

    // Deleting the peer empties the mirror.
    store
        .delete_cluster_state("default", &secondary.object_name)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mirror.snapshot().is_empty());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
