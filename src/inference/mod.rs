// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process object detection models
//!
//! The local backend only sees the [`ObjectDetector`] contract; the YOLO
//! ONNX model here is the production implementation.

pub mod nms;
pub mod yolo;

use image::DynamicImage;

use crate::detection::{BoundingBox, GeometryError};

pub use nms::non_max_suppression;
pub use yolo::{load_labels, YoloOnnxDetector, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD};

/// One model output item in corner form, source-image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]`
    pub corners: [f32; 4],
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, corners: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            corners,
        }
    }

    pub fn bbox(&self) -> Result<BoundingBox, GeometryError> {
        let [x1, y1, x2, y2] = self.corners;
        BoundingBox::from_corners(x1, y1, x2, y2)
    }
}

/// Synchronous, deterministic detector: same image and threshold, same output
#[cfg_attr(test, mockall::automock)]
pub trait ObjectDetector: Send + Sync {
    /// Detections at or above `confidence` (0.0-1.0)
    fn predict(&self, image: &DynamicImage, confidence: f32) -> anyhow::Result<Vec<RawDetection>>;
}
