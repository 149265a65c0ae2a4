// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-class non-maximum suppression

use super::RawDetection;

/// Keep the highest-scoring box of every overlapping same-label group
///
/// Boxes with invalid corners are dropped. Output is ordered by
/// descending confidence.
pub fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<(RawDetection, crate::detection::BoundingBox)> = Vec::new();
    for candidate in candidates {
        let Ok(bbox) = candidate.bbox() else {
            continue;
        };
        let suppressed = kept
            .iter()
            .any(|(k, kb)| k.label == candidate.label && kb.iou(&bbox) > iou_threshold);
        if !suppressed {
            kept.push((candidate, bbox));
        }
    }

    kept.into_iter().map(|(d, _)| d).collect()
}
