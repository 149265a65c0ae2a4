// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Annotated preview rendering
//!
//! Draws each detection's rectangle (or polygon outline for OCR lines)
//! plus a `kind: confidence` tag onto a private copy of the upload.

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_polygon_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::point::Point as CanvasPoint;
use imageproc::rect::Rect;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PreviewConfig;
use crate::detection::Detection;

const LABEL_CHAR_WIDTH: f32 = 0.55; // average glyph width as a fraction of font size
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [[u8; 3]; 6] = [
    [255, 0, 0],
    [0, 170, 0],
    [0, 90, 255],
    [230, 140, 0],
    [170, 0, 200],
    [0, 170, 170],
];

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to load font from {path}: {reason}")]
    Font { path: String, reason: String },

    #[error("Failed to encode preview: {0}")]
    Encode(String),
}

/// Encoded preview ready for the artifact store
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

pub struct PreviewRenderer {
    font: Option<Arc<FontVec>>,
    font_size: f32,
    line_thickness: u32,
}

impl PreviewRenderer {
    /// Renderer without a font: tags are drawn without glyphs
    pub fn new(font_size: f32, line_thickness: u32) -> Self {
        Self {
            font: None,
            font_size,
            line_thickness: line_thickness.max(1),
        }
    }

    pub fn with_font_file(
        path: impl AsRef<Path>,
        font_size: f32,
        line_thickness: u32,
    ) -> Result<Self, PreviewError> {
        let path = path.as_ref();
        let font_err = |reason: String| PreviewError::Font {
            path: path.display().to_string(),
            reason,
        };

        let data = std::fs::read(path).map_err(|e| font_err(e.to_string()))?;
        let font = FontVec::try_from_vec(data).map_err(|e| font_err(e.to_string()))?;

        Ok(Self {
            font: Some(Arc::new(font)),
            ..Self::new(font_size, line_thickness)
        })
    }

    /// Build from configuration, falling back to glyph-less tags when the
    /// font cannot be loaded
    pub fn from_config(config: &PreviewConfig) -> Self {
        match &config.font_path {
            Some(path) => match Self::with_font_file(path, config.font_size, config.line_thickness)
            {
                Ok(renderer) => {
                    info!("Preview font loaded from {}", path);
                    renderer
                }
                Err(e) => {
                    warn!("{}; preview labels will have no text", e);
                    Self::new(config.font_size, config.line_thickness)
                }
            },
            None => {
                warn!("No preview font configured; preview labels will have no text");
                Self::new(config.font_size, config.line_thickness)
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw onto a copy of `image` and encode it as PNG
    pub fn render(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
    ) -> Result<Artifact, PreviewError> {
        let mut canvas = image.to_rgb8();
        self.draw(&mut canvas, detections);

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| PreviewError::Encode(e.to_string()))?;

        Ok(Artifact {
            bytes: out.into_inner(),
            extension: "png",
        })
    }

    /// Annotate `canvas` in place
    pub fn draw(&self, canvas: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            let color = color_for(detection.source());
            match detection.polygon().map(outline) {
                Some(poly) if poly.len() >= 2 => draw_hollow_polygon_mut(canvas, &poly, color),
                _ => self.draw_rect(canvas, detection, color),
            }
            self.draw_label(canvas, detection, color);
        }
    }

    fn draw_rect(&self, canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let bbox = detection.bbox().clamp_to(canvas.width(), canvas.height());
        let x = bbox.x_min().floor() as i32;
        let y = bbox.y_min().floor() as i32;
        let w = bbox.width().ceil() as i32;
        let h = bbox.height().ceil() as i32;

        for t in 0..self.line_thickness as i32 {
            let (tw, th) = (w - 2 * t, h - 2 * t);
            if tw <= 0 || th <= 0 {
                break;
            }
            draw_hollow_rect_mut(canvas, Rect::at(x + t, y + t).of_size(tw as u32, th as u32), color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let label = detection.label();
        let scale = PxScale::from(self.font_size);

        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font.as_ref(), &label),
            None => (
                (label.chars().count() as f32 * self.font_size * LABEL_CHAR_WIDTH) as u32,
                self.font_size as u32,
            ),
        };

        let tag_w = text_w as i32 + 2 * LABEL_PADDING;
        let tag_h = text_h as i32 + 2 * LABEL_PADDING;

        let x = (detection.bbox().x_min() as i32).max(0);
        let y = (detection.bbox().y_min() as i32 - tag_h).max(0);

        let width = (canvas.width() as i32 - x).min(tag_w);
        let height = (canvas.height() as i32 - y).min(tag_h);
        if width <= 0 || height <= 0 {
            return;
        }

        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(width as u32, height as u32), color);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + LABEL_PADDING,
                y + LABEL_PADDING,
                scale,
                font.as_ref(),
                &label,
            );
        }
    }
}

/// Distinct vertices of an open ring
///
/// Consecutive repeats are collapsed and a closing vertex equal to the
/// first is dropped; the drawing routine rejects rings with first == last.
fn outline(points: &[crate::detection::Point]) -> Vec<CanvasPoint<f32>> {
    let mut poly: Vec<CanvasPoint<f32>> = Vec::with_capacity(points.len());
    for p in points {
        let vertex = CanvasPoint::new(p.x, p.y);
        if poly.last() != Some(&vertex) {
            poly.push(vertex);
        }
    }
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    poly
}

/// Stable color per backend name
fn color_for(source: &str) -> Rgb<u8> {
    let idx = source.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize));
    Rgb(PALETTE[idx % PALETTE.len()])
}
