use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::liveness::{LivenessStatus, LivenessTracker};

pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
struct HealthState {
    liveness: Arc<LivenessTracker>,
    threshold: Duration,
}

/// Router answering liveness queries. Only reads the tracker.
pub fn router(liveness: Arc<LivenessTracker>, threshold: Duration) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .with_state(HealthState {
            liveness,
            threshold,
        })
}

/// Binds the health listener and serves it on its own task. The task only
/// finishes when serving fails, and hands that error back.
pub async fn spawn(
    addr: SocketAddr,
    liveness: Arc<LivenessTracker>,
    threshold: Duration,
) -> std::io::Result<JoinHandle<std::io::Result<()>>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, threshold = ?threshold, "health endpoint listening");

    let app = router(liveness, threshold);
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app.into_make_service()).await;
        if let Err(e) = &result {
            error!(error = %e, "health server error");
        }
        result
    }))
}

async fn health_handler(State(state): State<HealthState>) -> (StatusCode, String) {
    let status = state.liveness.status(SystemTime::now(), state.threshold);
    health_response(status)
}

fn health_response(status: LivenessStatus) -> (StatusCode, String) {
    match status {
        LivenessStatus::Healthy { .. } => (StatusCode::OK, "OK".to_string()),
        LivenessStatus::Uninitialized => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no data fetched yet".to_string(),
        ),
        LivenessStatus::Stale { age } => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("last successful fetch {}s ago", age.as_secs()),
        ),
    }
}
