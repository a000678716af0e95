//! The supervisor loop.
//!
//! Three phases: bootstrap credential provisioning (Phase A), post-boot
//! cleanup (Phase B), and the steady-state tick (Phase C). Within one tick
//! the sequence observe → elect → arbitrate → reconcile → signal → status →
//! metrics is strictly serial, so observers never see forging reported before
//! keys are on disk.

use crate::credentials::{CredentialManager, CredentialState};
use crate::error::Result;
use crate::metrics;
use crate::node::{self, NodeObserver, NodeTransition};
use crate::signal::{self, SignalReason};
use forgeguard_core::{ReplicaIdentity, Settings};
use forgeguard_coordination::{
    ClusterArbiter, ClusterSpec, CoordinationStore, HealthCheckSpec, HealthState, LeaseElection,
    PeerMirror, StatusReporter,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How long Phase A waits for the node before proceeding anyway.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

/// The `/health` endpoint reports live while the loop advanced within this
/// many tick intervals.
const LIVENESS_TICKS: u32 = 3;

struct StatusInner {
    startup_provisioned: bool,
    last_advance: Option<Instant>,
}

/// Shared supervisor heartbeat, read by the HTTP endpoints.
pub struct SupervisorStatus {
    inner: RwLock<StatusInner>,
    tick_interval: Duration,
}

impl SupervisorStatus {
    /// Create a status tracker for the given tick interval.
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            inner: RwLock::new(StatusInner {
                startup_provisioned: false,
                last_advance: None,
            }),
            tick_interval,
        }
    }

    /// Mark bootstrap provisioning as complete.
    pub fn mark_provisioned(&self) {
        self.inner.write().startup_provisioned = true;
    }

    /// Whether bootstrap provisioning completed.
    pub fn startup_provisioned(&self) -> bool {
        self.inner.read().startup_provisioned
    }

    /// Record one loop advance.
    pub fn mark_advance(&self) {
        self.inner.write().last_advance = Some(Instant::now());
    }

    /// Whether the loop advanced recently enough to count as live.
    pub fn is_live(&self) -> bool {
        self.inner
            .read()
            .last_advance
            .map(|at| at.elapsed() <= self.tick_interval * LIVENESS_TICKS)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TickMemory {
    is_leader: bool,
    shall_forge: bool,
}

enum TickOutcome {
    Continue,
    NodeLost,
}

/// The supervisor: owns the components and sequences the phases.
pub struct Supervisor {
    identity: ReplicaIdentity,
    sleep_interval: Duration,
    observer: NodeObserver,
    credentials: Arc<CredentialManager>,
    election: Arc<LeaseElection>,
    reporter: StatusReporter,
    arbiter: Option<Arc<ClusterArbiter>>,
    leader_flag: Arc<AtomicBool>,
    status: Arc<SupervisorStatus>,
    prev: TickMemory,
}

/// Everything `assemble` wires together. The supervisor is consumed by
/// `run`; the shared handles feed the HTTP layer and the background tasks.
pub struct SupervisorParts {
    /// The supervisor itself
    pub supervisor: Supervisor,

    /// Shared heartbeat for the readiness/liveness endpoints
    pub status: Arc<SupervisorStatus>,

    /// Credential manager, shared with the readiness endpoint
    pub credentials: Arc<CredentialManager>,

    /// Cluster arbiter, present when cluster management is enabled
    pub arbiter: Option<Arc<ClusterArbiter>>,

    /// Health mirror for the prober task and `/cluster-status`
    pub health: Option<Arc<HealthState>>,

    /// Peer mirror for the watch task
    pub mirror: Option<Arc<PeerMirror>>,

    /// Leadership flag shared with the health prober
    pub leader_flag: Arc<AtomicBool>,
}

/// Seed cluster spec derived from the environment. Used to create the
/// cluster state object when absent; operators evolve it externally.
pub fn seed_cluster_spec(settings: &Settings) -> ClusterSpec {
    ClusterSpec {
        priority: settings.cluster.priority,
        health_check: HealthCheckSpec {
            enabled: settings.cluster.health_endpoint.is_some(),
            endpoint: settings
                .cluster
                .health_endpoint
                .clone()
                .unwrap_or_default(),
            interval_seconds: settings.cluster.health_interval.as_secs(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Wire the supervisor and its shared handles from settings and a store.
pub fn assemble(settings: &Settings, store: Arc<dyn CoordinationStore>) -> SupervisorParts {
    metrics::register();

    let identity = settings.replica_identity();
    let status = Arc::new(SupervisorStatus::new(settings.election.sleep_interval));
    let credentials = Arc::new(CredentialManager::new(settings.credential_pairs()));
    let leader_flag = Arc::new(AtomicBool::new(false));

    let election = Arc::new(
        LeaseElection::new(
            Arc::clone(&store),
            identity.namespace.clone(),
            settings.lease_name(),
            identity.pod_name.clone(),
            settings.election.lease_duration,
        )
        .with_transition_callback(Box::new(|_| metrics::record_leadership_change())),
    );

    let reporter = StatusReporter::new(
        Arc::clone(&store),
        identity.namespace.clone(),
        identity.status_name(),
        identity.pod_name.clone(),
    );

    let (arbiter, health, mirror) = if settings.cluster.enabled {
        let health = Arc::new(HealthState::new());
        let mirror = Arc::new(PeerMirror::new());
        let arbiter = Arc::new(ClusterArbiter::new(
            Arc::clone(&store),
            identity.clone(),
            seed_cluster_spec(settings),
            Arc::clone(&health),
            Arc::clone(&mirror),
        ));
        (Some(arbiter), Some(health), Some(mirror))
    } else {
        (None, None, None)
    };

    let observer = NodeObserver::new(
        settings.paths.node_socket.clone(),
        settings.disable_socket_check,
    );

    let supervisor = Supervisor {
        identity,
        sleep_interval: settings.election.sleep_interval,
        observer,
        credentials: Arc::clone(&credentials),
        election,
        reporter,
        arbiter: arbiter.clone(),
        leader_flag: Arc::clone(&leader_flag),
        status: Arc::clone(&status),
        prev: TickMemory::default(),
    };

    SupervisorParts {
        supervisor,
        status,
        credentials,
        arbiter,
        health,
        mirror,
        leader_flag,
    }
}

impl Supervisor {
    /// Run until the shutdown signal flips, then clean up.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let result = self.run_phases(&mut shutdown).await;
        self.shutdown_cleanup().await;
        result
    }

    async fn run_phases(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        'lifecycle: loop {
            self.bootstrap(shutdown).await?;
            if *shutdown.borrow() {
                return Ok(());
            }

            self.startup_cleanup().await;

            let mut ticker = tokio::time::interval(self.sleep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return Ok(());
                        }
                    }
                    _ = ticker.tick() => {
                        self.status.mark_advance();
                        match self.tick().await? {
                            TickOutcome::Continue => {}
                            // Node restart expected; re-provision for its boot.
                            TickOutcome::NodeLost => continue 'lifecycle,
                        }
                    }
                }
            }
        }
    }

    /// Phase A: provision credentials unconditionally so the node can boot,
    /// then wait (bounded) for it to become stably present.
    ///
    /// The node refuses to start without credential files even as a
    /// non-producer; provisioning before any election prevents a restart
    /// loop.
    async fn bootstrap(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        info!("Provisioning bootstrap credentials");
        self.credentials.apply(CredentialState::Present)?;
        self.status.mark_provisioned();

        let deadline = Instant::now() + BOOTSTRAP_TIMEOUT;
        loop {
            self.status.mark_advance();
            self.observer.observe();

            if self.observer.is_stably_present() {
                info!("Node is stably present");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Node not present within the bootstrap window; proceeding");
                return Ok(());
            }
            if sleep_or_shutdown(shutdown, self.sleep_interval).await {
                return Ok(());
            }
        }
    }

    /// Phase B: the bootstrap credentials belong only to the lease holder
    /// once the node is up; every other replica removes them. No signal is
    /// sent — nothing is forging yet.
    async fn startup_cleanup(&mut self) {
        let outcome = self.election.try_acquire_or_renew().await;
        self.leader_flag.store(outcome.is_leader, Ordering::SeqCst);

        if !outcome.is_leader {
            info!(
                holder = outcome.holder.as_deref().unwrap_or(""),
                "Not the lease holder after bootstrap; removing bootstrap credentials"
            );
            if let Err(err) = self.credentials.apply(CredentialState::Absent) {
                error!(error = %err, "Bootstrap credential cleanup failed");
            }
        }

        self.prev = TickMemory {
            is_leader: outcome.is_leader,
            shall_forge: false,
        };
        metrics::set_tick_gauges(outcome.is_leader, false);
    }

    /// Phase C: one steady-state tick.
    async fn tick(&mut self) -> Result<TickOutcome> {
        // 1. Observe the node.
        let observation = self.observer.observe();
        if observation.transition == Some(NodeTransition::Failed) {
            return self.handle_node_loss().await;
        }

        // 2. Elect.
        let outcome = self.election.try_acquire_or_renew().await;
        let is_leader = outcome.is_leader;
        self.leader_flag.store(is_leader, Ordering::SeqCst);

        // 3-4. Arbitrate, on the leader path only.
        let shall_forge = match &self.arbiter {
            None => is_leader,
            Some(arbiter) if is_leader => {
                let decision = arbiter.should_allow_local_forging().await;
                metrics::set_cluster_gauges(decision.allow, decision.effective_priority);
                if !decision.allow {
                    debug!(reason = %decision.reason, "Cluster arbiter denies forging");
                }
                decision.allow
            }
            Some(_) => false,
        };

        // 5. Reconcile credentials before anything observable happens.
        let desired = if shall_forge {
            CredentialState::Present
        } else {
            CredentialState::Absent
        };
        let applied = self.credentials.apply(desired)?;

        // 6. Signal the node iff disk state changed.
        if applied {
            self.signal_node(is_leader, shall_forge);
        }

        // 7. Status objects: the leader writes every tick; a freshly demoted
        // follower clears its stale entry race-safely.
        if is_leader {
            if let Err(err) = self.reporter.publish(shall_forge).await {
                warn!(error = %err, "Forge status write failed");
            }
            if let Some(arbiter) = &self.arbiter {
                if let Err(err) = arbiter
                    .report_local_leader(&self.identity.pod_name, shall_forge)
                    .await
                {
                    warn!(error = %err, "Cluster status write failed");
                }
            }
        } else {
            match self.reporter.clear_if_self().await {
                Ok(true) => info!("Cleared stale leader status entry"),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "Leader status clear failed"),
            }
        }

        // 8. Metrics.
        metrics::set_tick_gauges(is_leader, shall_forge);

        self.prev = TickMemory {
            is_leader,
            shall_forge,
        };
        Ok(TickOutcome::Continue)
    }

    /// Node present→absent: forfeit leadership semantics and return to
    /// Phase A for the node's restart.
    async fn handle_node_loss(&mut self) -> Result<TickOutcome> {
        metrics::record_node_failure();
        warn!("Node socket disappeared; removing credentials and re-entering bootstrap");

        if self.prev.is_leader {
            match self.reporter.clear_if_self().await {
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Leader status clear failed during node loss"),
            }
        }

        if let Err(err) = self.credentials.apply(CredentialState::Absent) {
            error!(error = %err, "Credential removal failed during node loss");
        }

        self.leader_flag.store(false, Ordering::SeqCst);
        self.prev = TickMemory::default();
        metrics::set_tick_gauges(false, false);

        Ok(TickOutcome::NodeLost)
    }

    fn signal_node(&self, is_leader: bool, shall_forge: bool) {
        let reason = self.signal_reason(is_leader, shall_forge);

        match node::find_node_pid() {
            Some(pid) => match signal::send_reload(pid) {
                Ok(()) => {
                    metrics::record_signal(reason.as_str());
                    info!(pid, reason = reason.as_str(), "Sent reload signal to node");
                }
                Err(err) => {
                    warn!(
                        pid,
                        error = %err,
                        "Reload signal failed; node will pick up file changes"
                    );
                }
            },
            None => {
                metrics::record_signal_skipped();
                debug!("Node PID unknown; relying on file-change detection");
            }
        }
    }

    fn signal_reason(&self, is_leader: bool, shall_forge: bool) -> SignalReason {
        if shall_forge {
            if is_leader && !self.prev.is_leader {
                SignalReason::LeadershipAcquired
            } else {
                SignalReason::ClusterPermitted
            }
        } else if self.prev.is_leader && !is_leader {
            SignalReason::LeadershipLost
        } else if is_leader {
            SignalReason::ClusterDenied
        } else {
            SignalReason::StartupCleanup
        }
    }

    /// Termination: remove credentials, release the lease, clear status.
    /// Everything best-effort; the lease expires naturally if the store is
    /// unreachable.
    async fn shutdown_cleanup(&mut self) {
        info!("Shutting down; removing credentials and releasing the lease");

        if let Err(err) = self.credentials.apply(CredentialState::Absent) {
            error!(error = %err, "Credential removal failed during shutdown");
        }

        if self.prev.is_leader {
            if let Err(err) = self.reporter.clear_if_self().await {
                warn!(error = %err, "Leader status clear failed during shutdown");
            }
        }

        self.election.release_if_held().await;
        self.leader_flag.store(false, Ordering::SeqCst);
        metrics::set_tick_gauges(false, false);
    }
}

/// Sleep for `duration`, returning true when shutdown fired first. A closed
/// channel counts as shutdown.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
