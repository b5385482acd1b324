//! Detection model boundary
//!
//! The engine treats the model as an opaque function from a letterboxed CHW
//! tensor to raw detections in model-input coordinates. Implementations are
//! not required to be reentrant: the worker owns the only instance and calls
//! it from a single thread.

pub mod manager;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod yolo;

use crate::error::ModelError;
use argus_core::ModelConfig;

pub use manager::ModelManager;

/// Normalized RGB tensor in CHW layout, values in [0, 1]
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// One detection as reported by the model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_index: usize,
    pub confidence: f32,
    /// x_min, y_min, x_max, y_max in model-input pixels
    pub bbox: [f32; 4],
}

pub trait Detector: Send {
    fn name(&self) -> &str;

    /// Input resolution (width, height) the model expects
    fn input_size(&self) -> (u32, u32);

    fn gpu_available(&self) -> bool {
        false
    }

    fn detect(&mut self, input: &ModelInput) -> Result<Vec<RawDetection>, ModelError>;
}

/// Load the configured detector.
///
/// `score_floor` lets the model discard candidates that post-processing would
/// drop anyway.
#[cfg(feature = "onnx")]
pub fn load_detector(config: &ModelConfig, score_floor: f32) -> Result<Box<dyn Detector>, ModelError> {
    let detector = onnx::OnnxDetector::load(config, score_floor)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
pub fn load_detector(config: &ModelConfig, _score_floor: f32) -> Result<Box<dyn Detector>, ModelError> {
    Err(ModelError::Load(format!(
        "cannot load {}: argus-engine was built without the `onnx` feature",
        config.path.display()
    )))
}
