// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Multi-backend detection orchestrator
//!
//! Decodes an upload once, fans it out to the selected backends
//! concurrently, isolates their failures, renders previews and assembles
//! the [`DetectionReport`]. Only an undecodable upload (or a bad backend
//! selection) fails the whole request.

pub mod builder;
pub mod options;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::{BackendError, BackendInput, DetectOptions, DetectionBackend};
use crate::detection::{
    BackendFailure, BackendResult, BackendSuccess, Detection, DetectionReport, ImageMetadata,
};
use crate::preview::{ArtifactRef, ArtifactStore, PreviewRenderer};
use crate::vision::{decode_image_bytes, format_to_extension, ImageError};

pub use builder::build_backends;
pub use options::{OrchestratorSettings, ProcessOptions};

/// Request-fatal errors; everything else lands in the report
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] ImageError),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("No backends selected")]
    NoBackends,

    #[error("Request cancelled")]
    Cancelled,
}

pub struct Orchestrator {
    backends: Vec<Arc<dyn DetectionBackend>>,
    renderer: Arc<PreviewRenderer>,
    store: Arc<dyn ArtifactStore>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        backends: Vec<Arc<dyn DetectionBackend>>,
        renderer: PreviewRenderer,
        store: Arc<dyn ArtifactStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backends,
            renderer: Arc::new(renderer),
            store,
            settings,
        }
    }

    pub fn backends(&self) -> &[Arc<dyn DetectionBackend>] {
        &self.backends
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Resolve the requested subset, keeping configuration order
    fn select(&self, requested: Option<&[String]>) -> Result<Vec<Arc<dyn DetectionBackend>>, OrchestratorError> {
        let selected: Vec<_> = match requested {
            None => self.backends.clone(),
            Some(names) => {
                let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
                if let Some(unknown) = wanted
                    .iter()
                    .find(|n| !self.backends.iter().any(|b| b.name() == **n))
                {
                    return Err(OrchestratorError::UnknownBackend(unknown.to_string()));
                }
                self.backends
                    .iter()
                    .filter(|b| wanted.contains(b.name()))
                    .cloned()
                    .collect()
            }
        };

        if selected.is_empty() {
            return Err(OrchestratorError::NoBackends);
        }
        Ok(selected)
    }

    /// Run one upload through the selected backends
    pub async fn process(
        &self,
        upload: Bytes,
        options: ProcessOptions,
        cancel: CancellationToken,
    ) -> Result<DetectionReport, OrchestratorError> {
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();

        // 1. Decode once, before any backend sees the image
        let max_bytes = self.settings.max_upload_bytes;
        let raw = upload.clone();
        let (image, info) = tokio::task::spawn_blocking(move || decode_image_bytes(&raw, max_bytes))
            .await
            .map_err(|e| ImageError::DecodeFailed(format!("decoder task aborted: {}", e)))??;
        debug!(
            request_id = %request_id,
            "Decoded {}x{} {:?} upload",
            info.width, info.height, info.format
        );

        let selected = self.select(options.backends.as_deref())?;

        let metadata = ImageMetadata::from(&info);
        let mut input = BackendInput::new(image, upload, info);

        // 2. Persist the upload for backends that fetch by URL
        if selected.iter().any(|b| b.wants_image_url()) {
            let extension = format_to_extension(input.info.format);
            match self.store.put(input.bytes.to_vec(), extension).await {
                Ok(stored) => input.url = Some(stored.url),
                Err(e) => warn!(
                    request_id = %request_id,
                    "Could not persist upload, backends will get inline bytes: {}", e
                ),
            }
        }

        // 3. Fan out; results complete in any order
        let outcomes = join_all(selected.iter().map(|backend| {
            let backend_options = options.for_backend(backend.name());
            self.run_backend(backend, &input, backend_options, &cancel)
        }))
        .await;

        if cancel.is_cancelled() {
            info!(request_id = %request_id, "Request cancelled during dispatch");
            return Err(OrchestratorError::Cancelled);
        }

        // 4. Previews for the backends that produced detections
        let render_previews = options.render_previews;
        let shared = &input;
        let previews = join_all(outcomes.iter().map(|(outcome, _)| async move {
            match outcome {
                Ok(detections) if render_previews => {
                    Some(self.render_preview(shared, detections).await)
                }
                _ => None,
            }
        }))
        .await;

        // 5. Assemble
        let mut backends = BTreeMap::new();
        for ((backend, (outcome, elapsed_ms)), preview) in selected
            .iter()
            .zip(outcomes)
            .zip(previews)
        {
            let result = match outcome {
                Ok(detections) => {
                    info!(
                        request_id = %request_id,
                        backend = %backend.name(),
                        elapsed_ms,
                        detections = detections.len(),
                        "Backend succeeded"
                    );
                    let (preview, preview_error) = match preview {
                        Some(Ok(artifact)) => (Some(artifact), None),
                        Some(Err(code)) => (None, Some(code)),
                        None => (None, None),
                    };
                    BackendResult::Ok(BackendSuccess {
                        kind: backend.kind(),
                        detections,
                        preview,
                        preview_error,
                        elapsed_ms,
                    })
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        backend = %backend.name(),
                        elapsed_ms,
                        reason = e.reason(),
                        "Backend failed: {}", e
                    );
                    BackendResult::Error(BackendFailure {
                        kind: backend.kind(),
                        reason: e.reason(),
                        elapsed_ms,
                    })
                }
            };
            backends.insert(backend.name().to_string(), result);
        }

        let report = DetectionReport {
            request_id,
            created_at: Utc::now(),
            image: metadata,
            backends,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };

        if report.is_total_failure() {
            warn!(request_id = %report.request_id, "Every backend failed");
        }

        Ok(report)
    }

    /// One backend call with retries, a deadline and cancellation
    async fn run_backend(
        &self,
        backend: &Arc<dyn DetectionBackend>,
        input: &BackendInput,
        options: DetectOptions,
        cancel: &CancellationToken,
    ) -> (Result<Vec<Detection>, BackendError>, u64) {
        let start = Instant::now();

        let attempts = async {
            let mut attempt = 0;
            loop {
                match backend.detect(input, &options).await {
                    Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                        let delay = self.settings.retry_delay(attempt);
                        warn!(
                            backend = %backend.name(),
                            attempt = attempt + 1,
                            "Retrying in {:?} after: {}", delay, e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = tokio::time::timeout(self.settings.backend_timeout, attempts) => {
                result.unwrap_or(Err(BackendError::DeadlineExceeded))
            }
        };

        (result, start.elapsed().as_millis() as u64)
    }

    /// Render on the blocking pool and store; failures become a short code
    async fn render_preview(
        &self,
        input: &BackendInput,
        detections: &[Detection],
    ) -> Result<ArtifactRef, &'static str> {
        let renderer = Arc::clone(&self.renderer);
        let image = Arc::clone(&input.image);
        let detections = detections.to_vec();

        let artifact = tokio::task::spawn_blocking(move || renderer.render(&image, &detections))
            .await
            .map_err(|e| {
                warn!("Preview task aborted: {}", e);
                "render_error"
            })?
            .map_err(|e| {
                warn!("Preview rendering failed: {}", e);
                "render_error"
            })?;

        self.store
            .put(artifact.bytes, artifact.extension)
            .await
            .map_err(|e| {
                warn!("Preview could not be stored: {}", e);
                "store_error"
            })
    }
}
