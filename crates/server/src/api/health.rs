use axum::Json;
use axum::extract::State;

use super::AppState;
use super::schemas::HealthResponse;

/// `GET /health` -- service status, backend, and reclaim counters.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    summary = "Health check",
    description = "Returns service status, the active store backend, pending expiry timers and reclaim counters.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        backend: state.backend.to_owned(),
        pending_timers: state.timers.as_ref().map_or(0, |timers| timers.pending()),
        reclaim: state.metrics.snapshot().into(),
    })
}
