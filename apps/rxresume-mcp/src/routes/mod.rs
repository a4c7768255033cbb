pub mod health;
pub mod sse;

use axum::{
    routing::{get, post},
    Router,
};

use crate::mcp::MESSAGES_PATH;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // MCP over SSE
        .route("/sse", get(sse::open_stream))
        .route(
            MESSAGES_PATH,
            post(sse::post_message).delete(sse::close_stream),
        )
        .with_state(state)
}
