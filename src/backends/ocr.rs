// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cloud OCR backend (read-analyze job API)
//!
//! Submitting returns an `Operation-Location` handle which is polled until
//! the body carries an `analyzeResult` or reports `"failed"`. Each recognized
//! line becomes one polygon-form detection whose kind is the line text.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::poller::{AsyncJobPoller, JobObservation, JobStatusSource, PollConfig};
use super::{BackendError, BackendInput, DetectOptions, DetectionBackend};
use crate::detection::{polygon_from_flat, sort_reading_order, BackendKind, Detection};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const ANALYZE_PATH: &str = "vision/v3.1/read/analyze";

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub name: String,
    /// Resource endpoint, e.g. `https://myresource.cognitiveservices.azure.com/`
    pub endpoint: String,
    pub api_key: String,
    /// Per HTTP call, not for the whole job
    pub timeout: Duration,
    pub poll: PollConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

/// One recognized text line as returned by the service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadLine {
    pub bounding_box: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub words: Vec<ReadWord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadWord {
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl ReadLine {
    /// Mean word confidence, or 1.0 when the service gives none
    pub fn confidence(&self) -> f32 {
        let scores: Vec<f32> = self.words.iter().filter_map(|w| w.confidence).collect();
        if scores.is_empty() {
            1.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }
}

/// Interpret one poll response body
pub(crate) fn parse_read_status(body: &str) -> Result<JobObservation<Vec<ReadLine>>, BackendError> {
    let status: ReadStatus =
        serde_json::from_str(body).map_err(|e| BackendError::DecodeError(e.to_string()))?;

    if let Some(result) = status.analyze_result {
        let lines = result
            .read_results
            .into_iter()
            .flat_map(|page| page.lines)
            .collect();
        return Ok(JobObservation::Completed(lines));
    }

    match status.status.as_deref() {
        Some(s) if s.eq_ignore_ascii_case("failed") => {
            Ok(JobObservation::Failed("read job reported failure".to_string()))
        }
        Some(s) if s.eq_ignore_ascii_case("succeeded") => Ok(JobObservation::Completed(Vec::new())),
        _ => Ok(JobObservation::Pending),
    }
}

/// Polygon-form detections for lines at or above `min_confidence`
pub(crate) fn lines_to_detections(
    lines: Vec<ReadLine>,
    min_confidence: f32,
    source: &str,
) -> Result<Vec<Detection>, BackendError> {
    let mut detections = Vec::with_capacity(lines.len());
    for line in lines {
        let confidence = line.confidence();
        if confidence < min_confidence {
            continue;
        }
        let polygon = polygon_from_flat(&line.bounding_box)?;
        detections.push(Detection::from_polygon(line.text, confidence, polygon, source)?);
    }
    sort_reading_order(&mut detections);
    Ok(detections)
}

/// Status checks against an `Operation-Location` handle
struct ReadJob<'a> {
    client: &'a Client,
    api_key: &'a str,
}

#[async_trait]
impl JobStatusSource for ReadJob<'_> {
    type Output = Vec<ReadLine>;

    async fn check(&self, job_handle: &str) -> Result<JobObservation<Vec<ReadLine>>, BackendError> {
        let response = self
            .client
            .get(job_handle)
            .header(SUBSCRIPTION_KEY_HEADER, self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::RemoteError {
                status: status.as_u16(),
                body,
            });
        }

        parse_read_status(&body)
    }
}

pub struct OcrBackend {
    client: Client,
    name: String,
    analyze_url: String,
    api_key: String,
    poller: AsyncJobPoller,
}

impl OcrBackend {
    pub fn new(config: OcrConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let analyze_url = format!("{}/{}", config.endpoint.trim_end_matches('/'), ANALYZE_PATH);
        info!("OCR backend configured: name={}, endpoint={}", config.name, analyze_url);

        Ok(Self {
            client,
            name: config.name,
            analyze_url,
            api_key: config.api_key,
            poller: AsyncJobPoller::new(config.poll),
        })
    }

    /// Submit the image and return the job handle
    async fn submit(&self, input: &BackendInput) -> Result<String, BackendError> {
        let request = self
            .client
            .post(&self.analyze_url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key);

        let request = match &input.url {
            Some(url) => request.json(&serde_json::json!({ "url": url })),
            None => request
                .header("Content-Type", "application/octet-stream")
                .body(input.bytes.clone()),
        };

        let response = request.send().await.map_err(|e| {
            warn!(backend = %self.name, "OCR submit failed: {}", e);
            BackendError::SubmitError(format!("connection failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, %status, "OCR submit rejected: {}", body);
            return Err(BackendError::SubmitError(format!("status {}", status.as_u16())));
        }

        response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackendError::SubmitError("missing Operation-Location header".to_string()))
    }
}

#[async_trait]
impl DetectionBackend for OcrBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ocr
    }

    fn wants_image_url(&self) -> bool {
        true
    }

    async fn detect(
        &self,
        input: &BackendInput,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, BackendError> {
        let handle = self.submit(input).await?;
        debug!(backend = %self.name, "Read job submitted");

        let source = ReadJob {
            client: &self.client,
            api_key: &self.api_key,
        };
        let lines = self.poller.poll(&source, &handle).await?;

        lines_to_detections(lines, options.confidence, &self.name)
    }
}
