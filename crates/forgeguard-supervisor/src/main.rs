//! ForgeGuard binary entry point.

use anyhow::Context;
use dotenv::dotenv;
use forgeguard_core::Settings;
use forgeguard_coordination::{CoordinationStore, HealthProber, MemoryStore, PeerWatcher};
use forgeguard_supervisor::http::{self, ClusterStatusSource, HttpState};
use forgeguard_supervisor::{assemble, metrics, seed_cluster_spec, SupervisorError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Grace period for the supervisor's shutdown cleanup.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Grace period for the auxiliary tasks after shutdown.
const TASK_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    metrics::register();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            metrics::record_startup_failure();
            error!(error = %err, "Invalid configuration");
            return Err(err.into());
        }
    };

    info!(
        pod = %settings.identity.pod_name,
        network = %settings.identity.network,
        cluster_management = settings.cluster.enabled,
        "ForgeGuard starting"
    );

    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let parts = assemble(&settings, Arc::clone(&store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background: Vec<JoinHandle<()>> = Vec::new();
    let mut cluster_source = None;

    if let (Some(arbiter), Some(health), Some(mirror)) =
        (&parts.arbiter, &parts.health, &parts.mirror)
    {
        if let Err(err) = arbiter.ensure_cluster_state().await {
            warn!(error = %err, "Could not ensure cluster state object; continuing");
        }

        if let Some(object_name) = arbiter.object_name() {
            cluster_source = Some(ClusterStatusSource {
                store: Arc::clone(&store),
                namespace: settings.identity.namespace.clone(),
                object_name: object_name.clone(),
                health: Arc::clone(health),
            });

            let watcher = PeerWatcher::new(
                Arc::clone(&store),
                settings.identity.namespace.clone(),
                arbiter.peer_selector(),
                object_name,
                Arc::clone(mirror),
            );
            background.push(tokio::spawn(watcher.run(shutdown_rx.clone())));
        }

        // Probe per the operator-authored health spec when one exists, the
        // environment-seeded one otherwise.
        let health_check = match arbiter.object_name() {
            Some(name) => store
                .get_cluster_state(&settings.identity.namespace, &name)
                .await
                .map(|object| object.spec.health_check)
                .unwrap_or_else(|_| seed_cluster_spec(&settings).health_check),
            None => seed_cluster_spec(&settings).health_check,
        };

        if health_check.enabled && !health_check.endpoint.is_empty() {
            let prober = HealthProber::new(
                health_check.endpoint.clone(),
                Duration::from_secs(health_check.interval_seconds),
                Duration::from_secs(health_check.timeout_seconds),
                health_check.failure_threshold,
                Arc::clone(health),
                Arc::clone(&store),
                settings.identity.namespace.clone(),
                arbiter.object_name(),
                Arc::clone(&parts.leader_flag),
            );
            background.push(tokio::spawn(prober.run(shutdown_rx.clone())));
        }
    }

    let http_state = Arc::new(HttpState {
        status: Arc::clone(&parts.status),
        credentials: Arc::clone(&parts.credentials),
        prometheus,
        cluster: cluster_source,
        cluster_status_token: settings.cluster_status_token.clone(),
    });
    let http_task = tokio::spawn(http::serve(
        settings.metrics_port,
        http_state,
        shutdown_rx.clone(),
    ));

    let mut supervisor_task = tokio::spawn(parts.supervisor.run(shutdown_rx));

    let mut sigterm = signal(SignalKind::terminate()).context("SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("SIGINT handler")?;

    let mut supervisor_result: Option<Result<(), SupervisorError>> = None;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM; shutting down"),
        _ = sigint.recv() => info!("Received SIGINT; shutting down"),
        joined = &mut supervisor_task => {
            supervisor_result = Some(flatten_join(joined));
        }
    }

    let _ = shutdown_tx.send(true);

    let final_result = match supervisor_result {
        Some(result) => result,
        None => match tokio::time::timeout(SHUTDOWN_GRACE, supervisor_task).await {
            Ok(joined) => flatten_join(joined),
            Err(_) => {
                warn!("Shutdown grace period exceeded; exiting anyway");
                Ok(())
            }
        },
    };

    for task in background {
        let _ = tokio::time::timeout(TASK_GRACE, task).await;
    }
    let _ = tokio::time::timeout(TASK_GRACE, http_task).await;

    match final_result {
        Ok(()) => {
            info!("ForgeGuard stopped");
            Ok(())
        }
        Err(err) => {
            metrics::record_startup_failure();
            error!(error = %err, "Supervisor failed");
            Err(err.into())
        }
    }
}

fn flatten_join(
    joined: Result<Result<(), SupervisorError>, tokio::task::JoinError>,
) -> Result<(), SupervisorError> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(SupervisorError::Task(format!(
            "supervisor task failed: {}",
            join_err
        ))),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
