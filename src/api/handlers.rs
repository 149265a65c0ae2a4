// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{extract::State, Json};
use serde::Serialize;

use super::server::AppState;
use crate::version;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backends: usize,
    pub version: serde_json::Value,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let backends = state.orchestrator.backends().len();
    Json(HealthResponse {
        status: if backends > 0 { "ok" } else { "degraded" }.to_string(),
        backends,
        version: version::get_version_info(),
    })
}
