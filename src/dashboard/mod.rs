use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::hwinfo::GpuInfo;
use crate::stats::{AgentStats, StatsSnapshot};

#[derive(Clone)]
pub struct DashboardState {
    pub identity: String,
    pub gpu: GpuInfo,
    pub stats: Arc<AgentStats>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct AgentStatusResponse {
    identity: String,
    gpu_model: String,
    vram_mib: u64,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

/// Read-only status API routes.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agent", get(agent_status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting status API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status API server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Status API server failed");
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn agent_status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(AgentStatusResponse {
        identity: state.identity.clone(),
        gpu_model: state.gpu.model.clone(),
        vram_mib: state.gpu.vram_mib,
        stats: state.stats.snapshot(),
    })
}
