//! Status HTTP surface: process health and a cluster snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use volt_core::cluster::MemberId;
use volt_core::{Health, HealthStatus};

use crate::cluster::{DirectorState, MemberRegistry};

/// Shared state for status handlers.
#[derive(Clone)]
pub struct StatusState {
    pub health: Arc<Health>,
    pub registry: MemberRegistry,
    pub state: Arc<DirectorState>,
    pub member_id: MemberId,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    #[serde(flatten)]
    status: HealthStatus,
    member_id: MemberId,
    director: bool,
    version: &'static str,
}

/// Build the status router.
pub fn status_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/cluster", get(cluster_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status router until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status server listening on {}", addr);

    axum::serve(listener, status_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let status = state.health.read();
    let code = if status.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status,
            member_id: state.member_id.clone(),
            director: state.state.get(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn cluster_handler(State(state): State<StatusState>) -> impl IntoResponse {
    match state.registry.cluster_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build cluster stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
