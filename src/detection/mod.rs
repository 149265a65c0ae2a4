// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Canonical geometry and detection types shared by every backend

pub mod bbox;
pub mod types;

pub use bbox::{polygon_from_flat, BoundingBox, GeometryError, Point};
pub use types::{
    sort_reading_order, BackendFailure, BackendKind, BackendResult, BackendSuccess,
    ConfidenceScale, Detection, DetectionReport, ImageMetadata,
};
