// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process model backend

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{BackendError, BackendInput, DetectOptions, DetectionBackend};
use crate::detection::{sort_reading_order, BackendKind, Detection};
use crate::inference::ObjectDetector;

/// Runs an [`ObjectDetector`] on the blocking pool
pub struct LocalBackend {
    name: String,
    detector: Arc<dyn ObjectDetector>,
}

impl LocalBackend {
    pub fn new(name: impl Into<String>, detector: Arc<dyn ObjectDetector>) -> Self {
        Self {
            name: name.into(),
            detector,
        }
    }
}

#[async_trait]
impl DetectionBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn detect(
        &self,
        input: &BackendInput,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, BackendError> {
        let detector = Arc::clone(&self.detector);
        let image = Arc::clone(&input.image);
        let confidence = options.confidence;

        let raw = tokio::task::spawn_blocking(move || detector.predict(&image, confidence))
            .await
            .map_err(|e| BackendError::InferenceError(format!("model task aborted: {}", e)))?
            .map_err(|e| BackendError::InferenceError(format!("{:#}", e)))?;

        debug!(backend = %self.name, raw = raw.len(), "Model returned detections");

        let mut detections = raw
            .into_iter()
            .map(|r| -> Result<Detection, BackendError> {
                let bbox = r.bbox()?;
                Ok(Detection::new(r.label, r.confidence, bbox, self.name.as_str()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        sort_reading_order(&mut detections);

        Ok(detections)
    }
}
