// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Hosted object detector backend
//!
//! One POST per image: the upload is passed either as an `image=<url>`
//! query parameter or as a base64 body. Predictions come back center-form.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BackendError, BackendInput, DetectOptions, DetectionBackend};
use crate::detection::{sort_reading_order, BackendKind, BoundingBox, ConfidenceScale, Detection};

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub name: String,
    /// Full model endpoint, e.g. `https://detect.example.com/ui-elements/3`
    pub predict_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// The hosted API reports 0-100
    pub confidence_scale: ConfidenceScale,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

pub struct RemoteBackend {
    client: Client,
    name: String,
    predict_url: String,
    api_key: String,
    confidence_scale: ConfidenceScale,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let predict_url = config.predict_url.trim_end_matches('/').to_string();
        info!(
            "Remote detector configured: name={}, endpoint={}",
            config.name, predict_url
        );

        Ok(Self {
            client,
            name: config.name,
            predict_url,
            api_key: config.api_key,
            confidence_scale: config.confidence_scale,
        })
    }

    fn query(&self, input: &BackendInput, options: &DetectOptions) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("api_key", self.api_key.clone()),
            ("confidence", percent(options.confidence)),
        ];
        if let Some(overlap) = options.overlap {
            query.push(("overlap", percent(overlap)));
        }
        if let Some(url) = &input.url {
            query.push(("image", url.clone()));
        }
        query
    }
}

/// The hosted API takes integer percentages
fn percent(value: f32) -> String {
    ((value * 100.0).round() as u32).to_string()
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

/// Convert a prediction body into canonical detections
pub(crate) fn parse_predictions(
    body: &str,
    source: &str,
    scale: ConfidenceScale,
) -> Result<Vec<Detection>, BackendError> {
    let response: PredictResponse =
        serde_json::from_str(body).map_err(|e| BackendError::DecodeError(e.to_string()))?;

    let mut detections = response
        .predictions
        .into_iter()
        .map(|p| -> Result<Detection, BackendError> {
            let bbox = BoundingBox::from_center(p.x, p.y, p.width, p.height)?;
            Ok(Detection::new(p.class, scale.normalize(p.confidence), bbox, source))
        })
        .collect::<Result<Vec<_>, _>>()?;
    sort_reading_order(&mut detections);

    Ok(detections)
}

#[async_trait]
impl DetectionBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn wants_image_url(&self) -> bool {
        true
    }

    async fn detect(
        &self,
        input: &BackendInput,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, BackendError> {
        let mut request = self
            .client
            .post(&self.predict_url)
            .query(&self.query(input, options));

        if input.url.is_none() {
            debug!(backend = %self.name, "No public URL, sending image inline");
            request = request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(STANDARD.encode(&input.bytes));
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, %status, "Remote detector rejected request");
            return Err(BackendError::RemoteError {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body = response.text().await?;
        parse_predictions(&body, &self.name, self.confidence_scale)
    }
}
