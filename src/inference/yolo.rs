// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! YOLO object detector exported to ONNX
//!
//! Expects the ultralytics export layout: input `[1, 3, S, S]` RGB in 0-1,
//! output `[1, 4 + classes, candidates]` with center-form boxes in input
//! pixels followed by per-class scores.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{s, Array4, ArrayView2, Axis, Ix2};
use ort::ep::CPU as CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{non_max_suppression, ObjectDetector, RawDetection};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Read a class list, one label per line
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels from {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[derive(Clone)]
pub struct YoloOnnxDetector {
    session: Arc<Mutex<Session>>,
    input_name: String,
    labels: Vec<String>,
    input_size: u32,
    iou_threshold: f32,
}

impl std::fmt::Debug for YoloOnnxDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloOnnxDetector")
            .field("input_name", &self.input_name)
            .field("labels", &self.labels.len())
            .field("input_size", &self.input_size)
            .field("iou_threshold", &self.iou_threshold)
            .finish_non_exhaustive()
    }
}

impl YoloOnnxDetector {
    /// Load the model on the CPU execution provider
    pub fn load<P: AsRef<Path>>(model_path: P, labels: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("Detection model not found: {}", model_path.display());
        }

        info!("Loading detection model from {}", model_path.display());

        let session = Session::builder()
            .map_err(ort::Error::<()>::from)
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(ort::Error::<()>::from)
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .map_err(ort::Error::<()>::from)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .map_err(ort::Error::<()>::from)
            .with_context(|| {
                format!("Failed to load detection model from {}", model_path.display())
            })?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .unwrap_or_else(|| "images".to_string());

        info!(
            "Detection model loaded: input={}, classes={}",
            input_name,
            labels.len()
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            labels,
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let size = self.input_size;
        let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        tensor
    }
}

impl ObjectDetector for YoloOnnxDetector {
    fn predict(&self, image: &DynamicImage, confidence: f32) -> Result<Vec<RawDetection>> {
        let input = Value::from_array(self.preprocess(image)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("Detection session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .context("Detection inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        let view = output
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .context("Unexpected detection output rank")?;

        let scale = (
            image.width() as f32 / self.input_size as f32,
            image.height() as f32 / self.input_size as f32,
        );
        let candidates = decode_output(view, &self.labels, confidence, scale, (image.width(), image.height()));
        debug!("{} candidates above {:.2}", candidates.len(), confidence);

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Turn one output matrix into corner-form candidates in source pixels
///
/// Accepts both `[4 + classes, candidates]` and its transpose.
pub(crate) fn decode_output(
    view: ArrayView2<f32>,
    labels: &[String],
    confidence: f32,
    (scale_x, scale_y): (f32, f32),
    (width, height): (u32, u32),
) -> Vec<RawDetection> {
    let transposed = if labels.is_empty() {
        view.nrows() > view.ncols()
    } else {
        let rows = labels.len() + 4;
        view.nrows() != rows && view.ncols() == rows
    };
    let view = if transposed {
        view.reversed_axes()
    } else {
        view
    };

    if view.nrows() < 5 {
        return Vec::new();
    }

    let (w, h) = (width as f32, height as f32);
    let mut detections = Vec::new();

    for i in 0..view.ncols() {
        let scores = view.slice(s![4.., i]);
        let Some((class_id, &score)) = scores
            .indexed_iter()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            continue;
        };

        if score < confidence {
            continue;
        }

        let (cx, cy, bw, bh) = (view[[0, i]], view[[1, i]], view[[2, i]], view[[3, i]]);
        let corners = [
            ((cx - bw / 2.0) * scale_x).clamp(0.0, w),
            ((cy - bh / 2.0) * scale_y).clamp(0.0, h),
            ((cx + bw / 2.0) * scale_x).clamp(0.0, w),
            ((cy + bh / 2.0) * scale_y).clamp(0.0, h),
        ];

        let label = labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));

        detections.push(RawDetection::new(label, score, corners));
    }

    detections
}
