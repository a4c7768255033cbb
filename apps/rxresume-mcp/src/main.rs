mod config;
mod errors;
mod mcp;
mod resume_client;
mod routes;
mod sse;
mod state;
mod tools;
mod xbackbone;

use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::mcp::McpHandler;
use crate::routes::build_router;
use crate::sse::SessionManager;
use crate::state::AppState;
use crate::tools::{ToolContext, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rxresume-mcp v{}", env!("CARGO_PKG_VERSION"));

    if config.resume.email.is_none() || config.resume.password.is_none() {
        warn!("RX_RESUME_EMAIL / RX_RESUME_PASSWORD not set; tools will need credentials per call");
    }

    let tools = ToolRegistry::with_resume_tools(Arc::new(ToolContext {
        resume: config.resume.clone(),
        xbackbone: config.xbackbone.clone(),
    }));
    info!("Registered {} tools", tools.definitions().len());

    let manager = SessionManager::new(config.sse.clone());
    manager.start_heartbeat();

    let state = AppState {
        manager: manager.clone(),
        mcp: Arc::new(McpHandler::new(Arc::new(tools))),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(manager.clone()))
    .await;

    if let Err(e) = served {
        manager.report_fatal(format!("server error: {e}")).await;
    }
    manager.shutdown().await;

    if let Some(fatal) = manager.fatal_error() {
        bail!("terminated after fatal error: {fatal}");
    }
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or once the manager shut itself down.
async fn shutdown_signal(manager: SessionManager) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = manager.closed() => {}
    }

    manager.shutdown().await;
}
