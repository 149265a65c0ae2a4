// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Canonical bounding box and the conversions into it
//!
//! Every backend reports rectangles in its own convention:
//! - the local model emits corner form `[x_min, y_min, x_max, y_max]`
//! - the hosted detector emits center form `(cx, cy, width, height)`
//! - the read API emits quadrilaterals as flat `[x1, y1, ..., x4, y4]`
//!
//! All of them end up as a [`BoundingBox`] in source-image pixel space.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed coordinates delivered by a backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Coordinate is not a finite number: {0}")]
    NonFinite(f32),

    #[error("Negative extent: width={width}, height={height}")]
    NegativeExtent { width: f32, height: f32 },

    #[error("Polygon has no vertices")]
    EmptyPolygon,

    #[error("Flat polygon has odd number of coordinates: {0}")]
    OddCoordinateCount(usize),
}

/// A vertex in source-image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in corner form
///
/// Invariant: `x_min <= x_max`, `y_min <= y_max`, all four fields finite
/// and non-negative. The only way to obtain one is through the
/// conversion constructors, which enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
}

fn finite(v: f32) -> Result<f32, GeometryError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(GeometryError::NonFinite(v))
    }
}

impl BoundingBox {
    /// Corner form. Swapped edges are reordered and negative values
    /// clamped to the image origin.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self, GeometryError> {
        let (x1, y1, x2, y2) = (finite(x1)?, finite(y1)?, finite(x2)?, finite(y2)?);

        Ok(Self {
            x_min: x1.min(x2).max(0.0),
            y_min: y1.min(y2).max(0.0),
            x_max: x1.max(x2).max(0.0),
            y_max: y1.max(y2).max(0.0),
        })
    }

    /// Center form: `(center_x, center_y, width, height)`
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Result<Self, GeometryError> {
        let (cx, cy, width, height) = (finite(cx)?, finite(cy)?, finite(width)?, finite(height)?);
        if width < 0.0 || height < 0.0 {
            return Err(GeometryError::NegativeExtent { width, height });
        }

        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Self::from_corners(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    /// Polygon form: the tightest axis-aligned envelope of all vertices
    pub fn from_polygon(points: &[Point]) -> Result<Self, GeometryError> {
        let first = points.first().ok_or(GeometryError::EmptyPolygon)?;

        let mut x_min = finite(first.x)?;
        let mut y_min = finite(first.y)?;
        let mut x_max = x_min;
        let mut y_max = y_min;

        for p in &points[1..] {
            let (x, y) = (finite(p.x)?, finite(p.y)?);
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }

        Self::from_corners(x_min, y_min, x_max, y_max)
    }

    pub fn x_min(&self) -> f32 {
        self.x_min
    }

    pub fn y_min(&self) -> f32 {
        self.y_min
    }

    pub fn x_max(&self) -> f32 {
        self.x_max
    }

    pub fn y_max(&self) -> f32 {
        self.y_max
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Inverse of [`BoundingBox::from_center`]
    pub fn to_center_form(&self) -> (f32, f32, f32, f32) {
        let c = self.center();
        (c.x, c.y, self.width(), self.height())
    }

    /// Inclusive on all edges
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }

    /// Intersection over union, used by non-maximum suppression
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Restrict the box to an image of the given size
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x_min: self.x_min.min(w),
            y_min: self.y_min.min(h),
            x_max: self.x_max.min(w),
            y_max: self.y_max.min(h),
        }
    }
}

/// Parse the read API's flat coordinate list into vertices
pub fn polygon_from_flat(coords: &[f32]) -> Result<Vec<Point>, GeometryError> {
    if coords.is_empty() {
        return Err(GeometryError::EmptyPolygon);
    }
    if coords.len() % 2 != 0 {
        return Err(GeometryError::OddCoordinateCount(coords.len()));
    }

    Ok(coords
        .chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect())
}
