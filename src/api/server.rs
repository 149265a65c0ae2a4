// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP server: router, shared state and graceful shutdown

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::detect::{backends_handler, detect_handler};
use super::handlers::health_handler;
use crate::orchestrator::Orchestrator;

/// Room for multipart boundaries and the text fields around the image
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.orchestrator
            .backends()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }
}

pub fn create_router(state: AppState, preview_dir: &Path) -> Router {
    let body_limit = state.orchestrator.settings().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Configured backends
        .route("/v1/backends", get(backends_handler))
        // Detection endpoint
        .route("/v1/detect", post(detect_handler))
        // Stored previews and persisted uploads
        .nest_service("/previews", ServeDir::new(preview_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
