use std::sync::Arc;

use crate::mcp::McpHandler;
use crate::sse::SessionManager;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    /// One dispatcher shared by every session transport.
    pub mcp: Arc<McpHandler>,
}
