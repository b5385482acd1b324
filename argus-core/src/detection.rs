//! Detection data model shared by the engine and the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Look up the label for a model class index.
pub fn class_label(class_index: usize) -> Option<&'static str> {
    COCO_CLASSES.get(class_index).copied()
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Axis-aligned box in source-image pixel coordinates.
///
/// Always satisfies `x_min < x_max` and `y_min < y_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBox")]
pub struct BoundingBox {
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
}

#[derive(Deserialize)]
struct RawBox {
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
}

impl TryFrom<RawBox> for BoundingBox {
    type Error = String;

    fn try_from(raw: RawBox) -> Result<Self, Self::Error> {
        BoundingBox::new(raw.x_min, raw.y_min, raw.x_max, raw.y_max)
    }
}

impl BoundingBox {
    /// Checks the box has valid parameters before constructing.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self, String> {
        if ![x_min, y_min, x_max, y_max].iter().all(|v| v.is_finite()) {
            return Err("BoundingBox coordinates must be finite".to_string());
        }
        if x_min >= x_max {
            return Err(format!(
                "Failed to create BoundingBox, x_min >= x_max ({} >= {})",
                x_min, x_max
            ));
        }
        if y_min >= y_max {
            return Err(format!(
                "Failed to create BoundingBox, y_min >= y_max ({} >= {})",
                y_min, y_max
            ));
        }
        Ok(Self { x_min, y_min, x_max, y_max })
    }

    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    pub fn y_min(&self) -> f64 {
        self.y_min
    }

    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    pub fn y_max(&self) -> f64 {
        self.y_max
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.x_min + self.x_max) / 2.0,
            y: (self.y_min + self.y_max) / 2.0,
        }
    }

    /// True when the box lies entirely inside an image of `size`.
    pub fn within(&self, size: ImageSize) -> bool {
        self.x_min >= 0.0
            && self.y_min >= 0.0
            && self.x_max <= size.width as f64
            && self.y_max <= size.height as f64
    }
}

/// One located object instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DetectionRecord", into = "DetectionRecord")]
pub struct Detection {
    object_id: u32,
    class_label: String,
    confidence: f64,
    bounding_box: BoundingBox,
    center: Point,
}

/// Wire form of a detection. `center` is written out but recomputed on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DetectionRecord {
    object_id: u32,
    class: String,
    confidence: f64,
    bounding_box: BoundingBox,
    center: Point,
}

impl From<Detection> for DetectionRecord {
    fn from(d: Detection) -> Self {
        DetectionRecord {
            object_id: d.object_id,
            class: d.class_label,
            confidence: d.confidence,
            bounding_box: d.bounding_box,
            center: d.center,
        }
    }
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = String;

    fn try_from(record: DetectionRecord) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&record.confidence) {
            return Err(format!("confidence {} outside [0, 1]", record.confidence));
        }
        if record.object_id == 0 {
            return Err("object_id is 1-based".to_string());
        }
        Ok(Detection::new(
            record.object_id,
            record.class,
            record.confidence,
            record.bounding_box,
        ))
    }
}

impl Detection {
    pub fn new(
        object_id: u32,
        class_label: impl Into<String>,
        confidence: f64,
        bounding_box: BoundingBox,
    ) -> Self {
        Self {
            object_id,
            class_label: class_label.into(),
            confidence,
            center: bounding_box.center(),
            bounding_box,
        }
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn class_label(&self) -> &str {
        &self.class_label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn center(&self) -> Point {
        self.center
    }
}

/// Response of the engine's detect operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub image_name: String,
    pub image_size: ImageSize,
    pub detections_count: usize,
    pub detections: Vec<Detection>,
    /// Annotated image, base64-encoded JPEG
    pub rendered_image: String,
    pub inference_ms: u64,
    pub model: String,
}

/// Client-facing result of an upload; also the persisted metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub image_name: String,
    pub image_size: ImageSize,
    pub detections_count: usize,
    pub detections: Vec<Detection>,
    pub result_image: String,
    pub result_json: String,
    pub timestamp: DateTime<Utc>,
}

/// Renumber detections 1..n in their current order.
pub fn assign_object_ids(detections: Vec<Detection>) -> Vec<Detection> {
    detections
        .into_iter()
        .enumerate()
        .map(|(idx, d)| Detection {
            object_id: idx as u32 + 1,
            ..d
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn test_coco_has_80_classes() {
        assert_eq!(COCO_CLASSES.len(), 80);
        assert_eq!(class_label(0), Some("person"));
        assert_eq!(class_label(79), Some("toothbrush"));
        assert_eq!(class_label(80), None);
    }

    #[test]
    fn test_bounding_box_rejects_inverted() {
        assert!(BoundingBox::new(10.0, 10.0, 5.0, 20.0).is_err());
        assert!(BoundingBox::new(10.0, 10.0, 20.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_center_is_midpoint() {
        let d = Detection::new(1, "dog", 0.9, bbox(10.0, 20.0, 30.0, 60.0));
        assert_eq!(d.center(), Point { x: 20.0, y: 40.0 });
    }

    #[test]
    fn test_detection_wire_format() {
        let d = Detection::new(3, "cat", 0.8765, bbox(1.5, 2.5, 10.0, 20.0));
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["object_id"], 3);
        assert_eq!(json["class"], "cat");
        assert_eq!(json["bounding_box"]["x_min"], 1.5);
        assert_eq!(json["center"]["x"], 5.75);
        assert_eq!(json["center"]["y"], 11.25);
    }

    #[test]
    fn test_deserialize_recomputes_center() {
        let json = r#"{
            "object_id": 1, "class": "car", "confidence": 0.5,
            "bounding_box": {"x_min": 0.0, "y_min": 0.0, "x_max": 10.0, "y_max": 10.0},
            "center": {"x": 999.0, "y": 999.0}
        }"#;
        let d: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(d.center(), Point { x: 5.0, y: 5.0 });
    }

    #[test]
    fn test_deserialize_rejects_bad_box() {
        let json = r#"{
            "object_id": 1, "class": "car", "confidence": 0.5,
            "bounding_box": {"x_min": 10.0, "y_min": 0.0, "x_max": 10.0, "y_max": 10.0},
            "center": {"x": 0.0, "y": 0.0}
        }"#;
        assert!(serde_json::from_str::<Detection>(json).is_err());
    }

    #[test]
    fn test_assign_object_ids() {
        let detections = vec![
            Detection::new(7, "a", 0.9, bbox(0.0, 0.0, 1.0, 1.0)),
            Detection::new(7, "b", 0.8, bbox(0.0, 0.0, 1.0, 1.0)),
        ];
        let ids: Vec<u32> = assign_object_ids(detections)
            .iter()
            .map(|d| d.object_id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_within_bounds() {
        let size = ImageSize::new(100, 50);
        assert!(bbox(0.0, 0.0, 100.0, 50.0).within(size));
        assert!(!bbox(0.0, 0.0, 100.5, 50.0).within(size));
    }
}
