//! HTTP server wiring: router, shared state, graceful shutdown.

pub mod ws;

use crate::config::Config;
use crate::models::ModelSet;
use crate::session::registry::SessionRegistry;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub models: Arc<ModelSet>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, models: Arc<ModelSet>) -> Self {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(
            config.session.idle_ttl_seconds,
        )));
        Self {
            registry,
            models,
            config: Arc::new(config),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/transcribe-stream-cumulative", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.models.is_ready();
    Json(json!({
        "status": if ready { "ok" } else { "degraded" },
        "modelReady": ready,
        "activeSessions": state.registry.len(),
    }))
}

/// Run the server until SIGTERM/SIGINT, then drain active sessions.
pub async fn serve(config: Config, models: Arc<ModelSet>) -> anyhow::Result<()> {
    let state = AppState::new(config, models);
    let registry = state.registry.clone();

    let sweeper = registry.spawn_sweeper(Duration::from_secs(
        state.config.session.sweep_interval_seconds,
    ));

    let listener = tokio::net::TcpListener::bind(&state.config.server.bind_addr).await?;
    info!(addr = %state.config.server.bind_addr, "listening");

    // The shutdown future completing starts graceful shutdown; open
    // WebSocket connections close as their sessions finalize, bounded by
    // the finalization deadline plus a failsafe.
    let drain_registry = registry.clone();
    let failsafe = Duration::from_secs(state.config.stream.end_finalization_timeout_seconds + 5);
    let shutdown = async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining active sessions");
        drain_registry.request_end_all();
        let drain_registry = drain_registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(failsafe).await;
            drain_registry.close_all();
        });
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    sweeper.abort();
    info!("server stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
