// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Response types for the detection endpoints
//!
//! `POST /v1/detect` returns the [`DetectionReport`] itself.

use serde::Serialize;

use crate::backends::DetectionBackend;
use crate::detection::BackendKind;

pub use crate::detection::DetectionReport as DetectResponse;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub name: String,
    pub kind: BackendKind,
    pub fetches_by_url: bool,
}

impl BackendInfo {
    pub fn from_backend(backend: &dyn DetectionBackend) -> Self {
        Self {
            name: backend.name().to_string(),
            kind: backend.kind(),
            fetches_by_url: backend.wants_image_url(),
        }
    }
}

/// `GET /v1/backends`
#[derive(Debug, Clone, Serialize)]
pub struct BackendsResponse {
    pub backends: Vec<BackendInfo>,
}
