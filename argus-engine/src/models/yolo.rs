//! YOLO output decoding and non-maximum suppression
//!
//! Two export layouts are understood:
//! - YOLOv5: `[1, N, 5 + C]` rows of `cx, cy, w, h, objectness, class scores...`
//! - YOLOv8: `[1, 4 + C, N]` columns of `cx, cy, w, h, class scores...`

use super::RawDetection;
use crate::error::ModelError;
use std::cmp::Ordering;

/// Upper bound on candidates kept before NMS
const MAX_CANDIDATES: usize = 30_000;

/// Upper bound on detections returned per image
pub const MAX_DETECTIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// Candidates are rows, with an objectness column
    RowsWithObjectness,
    /// Candidates are columns, class scores only
    Columns,
}

/// Work out how a `[1, a, b]` output tensor for `num_classes` classes is laid out.
///
/// Returns the layout, the candidate count and the attribute count.
pub fn detect_layout(
    shape: &[usize],
    num_classes: usize,
) -> Result<(OutputLayout, usize, usize), ModelError> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(ModelError::Inference(format!(
            "unexpected output shape {:?}, expected [1, a, b]",
            shape
        )));
    }
    let (a, b) = (shape[1], shape[2]);
    if b == num_classes + 5 {
        Ok((OutputLayout::RowsWithObjectness, a, b))
    } else if a == num_classes + 4 {
        Ok((OutputLayout::Columns, b, a))
    } else {
        Err(ModelError::Inference(format!(
            "output shape {:?} does not match {} classes",
            shape, num_classes
        )))
    }
}

/// Turn a raw output tensor into scored candidates above `score_floor`.
pub fn decode_output(
    shape: &[usize],
    data: &[f32],
    num_classes: usize,
    score_floor: f32,
) -> Result<Vec<RawDetection>, ModelError> {
    let (layout, candidates, attrs) = detect_layout(shape, num_classes)?;
    if data.len() != candidates * attrs {
        return Err(ModelError::Inference(format!(
            "output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            candidates * attrs
        )));
    }

    let at = |candidate: usize, attr: usize| -> f32 {
        match layout {
            OutputLayout::RowsWithObjectness => data[candidate * attrs + attr],
            OutputLayout::Columns => data[attr * candidates + candidate],
        }
    };
    let (first_class, objectness) = match layout {
        OutputLayout::RowsWithObjectness => (5, true),
        OutputLayout::Columns => (4, false),
    };

    let mut out = Vec::new();
    for i in 0..candidates {
        let obj = if objectness { at(i, 4) } else { 1.0 };
        if !(obj >= score_floor) {
            continue;
        }

        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..attrs - first_class {
            let score = at(i, first_class + class);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }

        let confidence = obj * best_score;
        if !(confidence >= score_floor) {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        out.push(RawDetection {
            class_index: best_class,
            confidence,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
        if out.len() >= MAX_CANDIDATES {
            break;
        }
    }
    Ok(out)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Class-aware greedy NMS. Output is sorted by confidence, highest first.
pub fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_index == candidate.class_index && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
            if kept.len() >= MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}
