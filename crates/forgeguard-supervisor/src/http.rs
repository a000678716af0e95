//! Readiness, liveness, metrics, and peer-status HTTP endpoints.

use crate::credentials::CredentialManager;
use crate::error::{Result, SupervisorError};
use crate::supervisor::SupervisorStatus;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use forgeguard_coordination::{CoordinationStore, HealthState};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Where `/cluster-status` reads its snapshot from.
pub struct ClusterStatusSource {
    /// Store holding the cluster state object
    pub store: Arc<dyn CoordinationStore>,

    /// Namespace of the object
    pub namespace: String,

    /// Name of the object
    pub object_name: String,

    /// Live local health counters
    pub health: Arc<HealthState>,
}

/// Shared state behind the HTTP handlers.
pub struct HttpState {
    /// Supervisor heartbeat
    pub status: Arc<SupervisorStatus>,

    /// Credential manager for the readiness predicate
    pub credentials: Arc<CredentialManager>,

    /// Prometheus recorder handle
    pub prometheus: PrometheusHandle,

    /// Cluster snapshot source, when cluster management is enabled
    pub cluster: Option<ClusterStatusSource>,

    /// Bearer token protecting `/cluster-status`; route is 404 when unset
    pub cluster_status_token: Option<String>,
}

/// Build the router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/startup-status", get(startup_status))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/cluster-status", get(cluster_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown signal flips.
pub async fn serve(
    port: u16,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP endpoints listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|err| SupervisorError::Http(err.to_string()))
}

/// 200 once bootstrap provisioning ran or all credential files exist.
async fn startup_status(State(state): State<Arc<HttpState>>) -> Response {
    let provisioned = state.credentials.credentials_present();
    let ready = state.status.startup_provisioned() || provisioned;

    let (code, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(json!({
            "status": label,
            "credentials_provisioned": provisioned,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// 200 while the supervisor loop advanced recently.
async fn health(State(state): State<Arc<HttpState>>) -> Response {
    if state.status.is_live() {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "stalled" })),
        )
            .into_response()
    }
}

/// Prometheus text exposition.
async fn metrics_text(State(state): State<Arc<HttpState>>) -> Response {
    state.prometheus.render().into_response()
}

/// Bearer-guarded snapshot of the local cluster state object for
/// pull-polling peer discovery.
async fn cluster_status(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let (Some(token), Some(source)) = (&state.cluster_status_token, &state.cluster) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", token))
        .unwrap_or(false);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match source
        .store
        .get_cluster_state(&source.namespace, &source.object_name)
        .await
    {
        Ok(object) => Json(json!({
            "spec": object.spec,
            "status": object.status,
            "health": source.health.snapshot(),
        }))
        .into_response(),
        Err(err) if err.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
