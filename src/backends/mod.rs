// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection backends
//!
//! Every integration (in-process model, hosted detector, OCR read job) is
//! adapted to the single [`DetectionBackend`] contract and returns canonical
//! [`Detection`]s.

pub mod local;
pub mod ocr;
pub mod poller;
pub mod remote;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;

use crate::detection::{BackendKind, ConfidenceScale, Detection, GeometryError};
use crate::vision::ImageInfo;

pub use local::LocalBackend;
pub use ocr::{OcrBackend, OcrConfig};
pub use poller::{AsyncJobPoller, JobObservation, JobStatusSource, PollConfig, PollState, PollStatus};
pub use remote::{RemoteBackend, RemoteConfig};

/// Backend-local failure
///
/// Captured into that backend's entry of the report; never aborts siblings.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Remote returned {status}: {body}")]
    RemoteError { status: u16, body: String },

    #[error("Malformed response: {0}")]
    DecodeError(String),

    #[error("Job submission failed: {0}")]
    SubmitError(String),

    #[error("Job did not finish after {attempts} polls ({elapsed_ms}ms)")]
    PollTimeout { attempts: u32, elapsed_ms: u64 },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("Backend deadline exceeded")]
    DeadlineExceeded,

    #[error("Cancelled")]
    Cancelled,
}

impl BackendError {
    /// Machine-readable code written into the report
    pub fn reason(&self) -> &'static str {
        match self {
            BackendError::InferenceError(_) => "inference_error",
            BackendError::NetworkError(_) => "network_error",
            BackendError::RemoteError { .. } => "remote_error",
            BackendError::DecodeError(_) => "decode_error",
            BackendError::SubmitError(_) => "submit_error",
            BackendError::PollTimeout { .. } => "poll_timeout",
            BackendError::JobFailed(_) => "job_failed",
            BackendError::InvalidGeometry(_) => "invalid_geometry",
            BackendError::DeadlineExceeded => "deadline_exceeded",
            BackendError::Cancelled => "cancelled",
        }
    }

    /// Whether the orchestrator may try this backend again
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::NetworkError(_) => true,
            BackendError::RemoteError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::DecodeError(e.to_string())
        } else {
            BackendError::NetworkError(e.to_string())
        }
    }
}

/// Per-backend thresholds, both in 0.0-1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub confidence: f32,
    pub overlap: Option<f32>,
}

impl DetectOptions {
    pub fn new(confidence: f32, overlap: Option<f32>) -> Self {
        Self::on_scale(ConfidenceScale::Unit, confidence, overlap)
    }

    /// Build from caller values given on `scale`
    pub fn on_scale(scale: ConfidenceScale, confidence: f32, overlap: Option<f32>) -> Self {
        Self {
            confidence: scale.normalize(confidence),
            overlap: overlap.map(|o| scale.normalize(o)),
        }
    }
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            overlap: Some(0.3),
        }
    }
}

/// The decoded upload, shared read-only by every backend of one request
#[derive(Debug, Clone)]
pub struct BackendInput {
    pub image: Arc<DynamicImage>,
    pub bytes: Bytes,
    pub info: ImageInfo,
    /// Public URL of the persisted upload, when one was stored
    pub url: Option<String>,
}

impl BackendInput {
    pub fn new(image: DynamicImage, bytes: Bytes, info: ImageInfo) -> Self {
        Self {
            image: Arc::new(image),
            bytes,
            info,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Key used in the report and in per-backend options
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether this backend prefers to fetch the upload from a URL
    fn wants_image_url(&self) -> bool {
        false
    }

    async fn detect(
        &self,
        input: &BackendInput,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, BackendError>;
}
