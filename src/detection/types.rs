// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Normalized detection values and the aggregate report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use super::bbox::{BoundingBox, GeometryError, Point};
use crate::preview::ArtifactRef;
use crate::vision::ImageInfo;

/// Which family of integration produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
    Ocr,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
            BackendKind::Ocr => "ocr",
        }
    }
}

/// Scale a backend or caller reports confidences on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// 0.0-1.0
    #[default]
    Unit,
    /// 0-100
    Percent,
}

impl ConfidenceScale {
    /// Convert a value on this scale into 0.0-1.0
    ///
    /// Out-of-range values are clamped; non-finite values become 0.
    pub fn normalize(self, value: f32) -> f32 {
        if !value.is_finite() {
            return 0.0;
        }
        let v = match self {
            ConfidenceScale::Unit => value,
            ConfidenceScale::Percent => value / 100.0,
        };
        v.clamp(0.0, 1.0)
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

fn serialize_rounded<S: Serializer>(v: &f32, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f32(round2(*v))
}

/// One recognized element, normalized across backends
///
/// Created once per raw backend item and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    kind: String,
    #[serde(serialize_with = "serialize_rounded")]
    confidence: f32,
    #[serde(rename = "box")]
    bbox: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    polygon: Option<Vec<Point>>,
    source: String,
}

impl Detection {
    pub fn new(
        kind: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            confidence: ConfidenceScale::Unit.normalize(confidence),
            bbox,
            polygon: None,
            source: source.into(),
        }
    }

    /// Polygon form; the vertices are kept for rendering
    pub fn from_polygon(
        kind: impl Into<String>,
        confidence: f32,
        polygon: Vec<Point>,
        source: impl Into<String>,
    ) -> Result<Self, GeometryError> {
        let bbox = BoundingBox::from_polygon(&polygon)?;
        Ok(Self {
            kind: kind.into(),
            confidence: ConfidenceScale::Unit.normalize(confidence),
            bbox,
            polygon: Some(polygon),
            source: source.into(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Confidence as presented to callers
    pub fn rounded_confidence(&self) -> f32 {
        round2(self.confidence)
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn polygon(&self) -> Option<&[Point]> {
        self.polygon.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Text drawn next to the box in previews
    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.kind, self.rounded_confidence())
    }
}

/// Reading order: top to bottom, then left to right
pub fn sort_reading_order(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        a.bbox
            .y_min()
            .total_cmp(&b.bbox.y_min())
            .then(a.bbox.x_min().total_cmp(&b.bbox.x_min()))
    });
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSuccess {
    pub kind: BackendKind,
    pub detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_error: Option<&'static str>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFailure {
    pub kind: BackendKind,
    /// Machine-readable code, never a raw error string
    pub reason: &'static str,
    pub elapsed_ms: u64,
}

/// Outcome of invoking one backend for one request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BackendResult {
    Ok(BackendSuccess),
    Error(BackendFailure),
}

impl BackendResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, BackendResult::Ok(_))
    }

    pub fn detections(&self) -> Option<&[Detection]> {
        match self {
            BackendResult::Ok(s) => Some(&s.detections),
            BackendResult::Error(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            BackendResult::Ok(_) => None,
            BackendResult::Error(f) => Some(f.reason),
        }
    }

    pub fn preview(&self) -> Option<&ArtifactRef> {
        match self {
            BackendResult::Ok(s) => s.preview.as_ref(),
            BackendResult::Error(_) => None,
        }
    }
}

/// Request-level metadata about the decoded upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub color_type: String,
    pub size_bytes: usize,
}

impl From<&ImageInfo> for ImageMetadata {
    fn from(info: &ImageInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            format: crate::vision::format_to_extension(info.format).to_string(),
            color_type: format!("{:?}", info.color_type),
            size_bytes: info.size_bytes,
        }
    }
}

/// Aggregate response for one upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub image: ImageMetadata,
    pub backends: BTreeMap<String, BackendResult>,
    pub processing_time_ms: u64,
}

impl DetectionReport {
    pub fn backend(&self, name: &str) -> Option<&BackendResult> {
        self.backends.get(name)
    }

    pub fn successful(&self) -> impl Iterator<Item = (&String, &BackendResult)> {
        self.backends.iter().filter(|(_, r)| r.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&String, &BackendResult)> {
        self.backends.iter().filter(|(_, r)| !r.is_ok())
    }

    /// Every backend failed; still a valid report
    pub fn is_total_failure(&self) -> bool {
        !self.backends.is_empty() && self.backends.values().all(|r| !r.is_ok())
    }
}
