use axum::{extract::State, Json};
use serde::Serialize;

use crate::mcp::handler::SERVER_NAME;
use crate::sse::HealthSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    #[serde(flatten)]
    pub sessions: HealthSnapshot,
}

/// GET /health
/// Returns service version plus session counts and reconnect bookkeeping.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.manager.health_snapshot().await;
    Json(HealthResponse {
        status: if sessions.accepting { "ok" } else { "shutting_down" },
        version: env!("CARGO_PKG_VERSION"),
        service: SERVER_NAME,
        sessions,
    })
}
