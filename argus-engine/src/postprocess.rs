//! Turn raw model output into validated detections in source-image pixels

use crate::models::RawDetection;
use crate::preprocess::Letterbox;
use argus_core::{assign_object_ids, class_label, BoundingBox, Detection, DetectionOrder};
use std::cmp::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct PostprocessConfig {
    pub confidence_threshold: f64,
    pub order: DetectionOrder,
}

impl PostprocessConfig {
    pub fn new(confidence_threshold: f32, order: DetectionOrder) -> Self {
        // Compare on the same 4-decimal grid as the reported confidences
        Self {
            confidence_threshold: round_to(confidence_threshold as f64, 4),
            order,
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Filter, rescale, clamp and number the raw detections.
///
/// Every returned detection has a confidence in `[threshold, 1]`, a box inside
/// the source image with positive width and height, and an `object_id` in
/// `1..=n` matching its position.
pub fn postprocess(
    raw: &[RawDetection],
    letterbox: &Letterbox,
    config: &PostprocessConfig,
) -> Vec<Detection> {
    let width = letterbox.source.width as f64;
    let height = letterbox.source.height as f64;

    let mut detections = Vec::with_capacity(raw.len());
    for det in raw {
        if !det.confidence.is_finite() || !det.bbox.iter().all(|v| v.is_finite()) {
            debug!("Dropping non-finite detection {:?}", det);
            continue;
        }

        let confidence = round_to(det.confidence as f64, 4);
        if confidence < config.confidence_threshold || confidence > 1.0 {
            continue;
        }

        let label = match class_label(det.class_index) {
            Some(label) => label,
            None => {
                warn!("Dropping detection with unknown class index {}", det.class_index);
                continue;
            }
        };

        let (x1, y1) = letterbox.to_source(det.bbox[0] as f64, det.bbox[1] as f64);
        let (x2, y2) = letterbox.to_source(det.bbox[2] as f64, det.bbox[3] as f64);
        let x_min = round_to(x1.min(x2).clamp(0.0, width), 2);
        let y_min = round_to(y1.min(y2).clamp(0.0, height), 2);
        let x_max = round_to(x1.max(x2).clamp(0.0, width), 2);
        let y_max = round_to(y1.max(y2).clamp(0.0, height), 2);

        match BoundingBox::new(x_min, y_min, x_max, y_max) {
            Ok(bbox) => detections.push(Detection::new(0, label, confidence, bbox)),
            Err(reason) => debug!("Dropping degenerate {} box: {}", label, reason),
        }
    }

    if config.order == DetectionOrder::Confidence {
        // stable: equal confidences keep model order
        detections.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(Ordering::Equal)
        });
    }

    assign_object_ids(detections)
}
