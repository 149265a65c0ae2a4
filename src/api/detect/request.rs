// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detect request parsing and validation
//!
//! The endpoint takes `multipart/form-data`:
//! - `image` (required): the upload
//! - `confidence`, `overlap`: defaults for every backend, as percentages 0-100
//! - `confidence.<backend>`, `overlap.<backend>`: per-backend overrides
//! - `backends`: comma-separated subset to run
//! - `preview`: `true`/`false`

use axum_extra::extract::Multipart;
use bytes::Bytes;
use std::collections::HashMap;

use crate::api::errors::ApiError;
use crate::backends::DetectOptions;
use crate::detection::ConfidenceScale;
use crate::orchestrator::ProcessOptions;

#[derive(Debug, Clone, Default)]
pub struct DetectRequest {
    pub image: Option<Bytes>,
    pub confidence: Option<f32>,
    pub overlap: Option<f32>,
    pub backend_confidence: HashMap<String, f32>,
    pub backend_overlap: HashMap<String, f32>,
    pub backends: Option<Vec<String>>,
    pub preview: Option<bool>,
}

/// Parse a percentage field into 0.0-1.0
fn parse_threshold(field: &str, value: &str) -> Result<f32, ApiError> {
    let parsed: f32 = value.trim().parse().map_err(|_| ApiError::ValidationError {
        field: field.to_string(),
        message: format!("'{}' is not a number", value.trim()),
    })?;
    if !parsed.is_finite() || !(0.0..=100.0).contains(&parsed) {
        return Err(ApiError::ValidationError {
            field: field.to_string(),
            message: "must be between 0 and 100".to_string(),
        });
    }
    Ok(ConfidenceScale::Percent.normalize(parsed))
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ApiError::ValidationError {
            field: field.to_string(),
            message: format!("'{}' is not a boolean", other),
        }),
    }
}

impl DetectRequest {
    /// Read every part of the form
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut request = DetectRequest::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let data = field.bytes().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read image part: {}", e))
                })?;
                request.image = Some(data);
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read field '{}': {}", name, e))
                })?;
                request.apply_field(&name, &value)?;
            }
        }

        request.validate()?;
        Ok(request)
    }

    /// Apply one text part; unknown fields are ignored
    pub fn apply_field(&mut self, name: &str, value: &str) -> Result<(), ApiError> {
        match name {
            "confidence" => self.confidence = Some(parse_threshold(name, value)?),
            "overlap" => self.overlap = Some(parse_threshold(name, value)?),
            "preview" => self.preview = Some(parse_bool(name, value)?),
            "backends" => {
                let names: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if !names.is_empty() {
                    self.backends = Some(names);
                }
            }
            _ => {
                if let Some(backend) = name.strip_prefix("confidence.") {
                    self.backend_confidence
                        .insert(backend.to_string(), parse_threshold(name, value)?);
                } else if let Some(backend) = name.strip_prefix("overlap.") {
                    self.backend_overlap
                        .insert(backend.to_string(), parse_threshold(name, value)?);
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        match &self.image {
            Some(image) if !image.is_empty() => Ok(()),
            _ => Err(ApiError::ValidationError {
                field: "image".to_string(),
                message: "image is required".to_string(),
            }),
        }
    }

    /// Merge with the node defaults
    pub fn to_process_options(&self, defaults: &ProcessOptions) -> ProcessOptions {
        let base = DetectOptions::new(
            self.confidence.unwrap_or(defaults.defaults.confidence),
            self.overlap.or(defaults.defaults.overlap),
        );

        let mut per_backend = HashMap::new();
        let names = self
            .backend_confidence
            .keys()
            .chain(self.backend_overlap.keys());
        for name in names {
            let confidence = self.backend_confidence.get(name).copied().unwrap_or(base.confidence);
            let overlap = self.backend_overlap.get(name).copied().or(base.overlap);
            per_backend.insert(name.clone(), DetectOptions::new(confidence, overlap));
        }

        ProcessOptions {
            defaults: base,
            per_backend,
            backends: self.backends.clone(),
            render_previews: self.preview.unwrap_or(defaults.render_previews),
        }
    }
}
