// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection endpoint handlers

use axum::{extract::State, Json};
use axum_extra::extract::Multipart;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::request::DetectRequest;
use super::response::{BackendInfo, BackendsResponse, DetectResponse};
use crate::api::errors::ApiError;
use crate::api::server::AppState;

/// POST /v1/detect - Run an uploaded image through the detection backends
///
/// # Errors
/// - 400 Bad Request: missing or undecodable image, bad option, unknown backend
/// - 503 Service Unavailable: no backends configured, request cancelled
/// - 504 Gateway Timeout: request deadline exceeded
pub async fn detect_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    // 1. Parse and validate the form
    let request = DetectRequest::from_multipart(multipart).await.map_err(|e| {
        warn!("Detect request rejected: {}", e);
        e
    })?;

    let defaults = state.orchestrator.settings().default_options();
    let options = request.to_process_options(&defaults);
    let image = request.image.unwrap_or_default();
    debug!(
        "Detect request: {} bytes, backends={:?}, preview={}",
        image.len(),
        options.backends,
        options.render_previews
    );

    // 2. Cancel every backend if this handler is dropped (client went away)
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    // 3. Run under the request deadline
    let result = tokio::time::timeout(
        state.request_timeout,
        state.orchestrator.process(image, options, cancel),
    )
    .await
    .map_err(|_| {
        warn!("Detect request exceeded {:?}", state.request_timeout);
        ApiError::Timeout
    })?;

    let report = result.map_err(|e| {
        warn!("Detect request failed: {}", e);
        ApiError::from_orchestrator(e, state.backend_names())
    })?;

    info!(
        "Detect complete: request_id={}, {}/{} backends ok, {}ms",
        report.request_id,
        report.successful().count(),
        report.backends.len(),
        report.processing_time_ms
    );

    Ok(Json(report))
}

/// GET /v1/backends - List configured backends
pub async fn backends_handler(State(state): State<AppState>) -> Json<BackendsResponse> {
    let backends = state
        .orchestrator
        .backends()
        .iter()
        .map(|b| BackendInfo::from_backend(b.as_ref()))
        .collect();
    Json(BackendsResponse { backends })
}
