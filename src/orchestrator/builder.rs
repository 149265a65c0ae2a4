// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Backend construction from configuration
//!
//! Runs once at startup; the resulting backends are shared read-only by
//! every request.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backends::{DetectionBackend, LocalBackend, OcrBackend, RemoteBackend};
use crate::config::{LocalModelConfig, NodeConfig};
use crate::inference::{load_labels, YoloOnnxDetector};

fn load_local(model: &LocalModelConfig) -> Result<LocalBackend> {
    let labels = match &model.labels_path {
        Some(path) => load_labels(path)?,
        None => Vec::new(),
    };

    let detector = YoloOnnxDetector::load(&model.model_path, labels)?
        .with_input_size(model.input_size)
        .with_iou_threshold(model.iou_threshold);

    Ok(LocalBackend::new(model.name.clone(), Arc::new(detector)))
}

/// Build every configured backend
///
/// A local model that fails to load is skipped with a warning so the node
/// still serves its other backends. HTTP client construction failures are
/// fatal.
pub fn build_backends(config: &NodeConfig) -> Result<Vec<Arc<dyn DetectionBackend>>> {
    let mut backends: Vec<Arc<dyn DetectionBackend>> = Vec::new();

    for model in &config.local {
        match load_local(model) {
            Ok(backend) => {
                info!("Local backend '{}' ready", model.name);
                backends.push(Arc::new(backend));
            }
            Err(e) => {
                warn!("Skipping local backend '{}': {:#}", model.name, e);
            }
        }
    }

    if let Some(remote) = &config.remote {
        backends.push(Arc::new(RemoteBackend::new(remote.to_backend_config())?));
    }

    if let Some(ocr) = &config.ocr {
        backends.push(Arc::new(OcrBackend::new(ocr.to_backend_config())?));
    }

    if backends.is_empty() {
        warn!("No detection backends configured");
    }

    Ok(backends)
}
