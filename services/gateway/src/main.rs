mod config;
mod engine_vllm;
mod routes_generate;
mod routes_health;
mod routes_runtime;
mod state;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use lifecycle::LifecycleManager;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::engine_vllm::VllmEngine;
use crate::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;
    info!(
        model_path = %cfg.model_path,
        gpu_util = cfg.gpu_util,
        idle_seconds = cfg.idle_seconds,
        "gateway starting"
    );

    // Model is not loaded until the first request.
    let engine = Arc::new(VllmEngine::new(cfg.engine.clone()));
    let manager = Arc::new(LifecycleManager::new(engine, cfg.manager_config()));
    manager.start();

    let app_state = Arc::new(AppState::new(manager.clone()));
    let app = router(app_state);

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.shutdown().await;
    Ok(())
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(crate::routes_health::health))
        .route("/generate/", post(crate::routes_generate::generate))
        .route("/generate", post(crate::routes_generate::generate))
        .route("/runtime", get(crate::routes_runtime::get_runtime))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
