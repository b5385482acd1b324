//! ONNX Runtime detector for YOLOv5 / YOLOv8 exports

use super::yolo::{decode_output, non_max_suppression};
use super::{Detector, ModelInput, RawDetection};
use crate::error::ModelError;
use argus_core::{ModelConfig, COCO_CLASSES};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

pub struct OnnxDetector {
    session: Session,
    name: String,
    input_size: (u32, u32),
    iou_threshold: f32,
    score_floor: f32,
}

impl OnnxDetector {
    pub fn load(config: &ModelConfig, score_floor: f32) -> Result<Self, ModelError> {
        if !config.path.exists() {
            return Err(ModelError::NotFound(config.path.clone()));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads.max(1))?
            .commit_from_file(&config.path)
            .map_err(|e| ModelError::Load(format!("{}: {}", config.path.display(), e)))?;

        info!(
            "Model {} loaded from {:?} ({}x{})",
            config.name, config.path, config.input_width, config.input_height
        );

        Ok(Self {
            session,
            name: config.name.clone(),
            input_size: (config.input_width, config.input_height),
            iou_threshold: config.iou_threshold,
            score_floor,
        })
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn detect(&mut self, input: &ModelInput) -> Result<Vec<RawDetection>, ModelError> {
        let shape = [1usize, 3, input.height as usize, input.width as usize];
        let tensor = Tensor::from_array((shape, input.data.clone()))?;

        let outputs = self.session.run(ort::inputs![tensor])?;
        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        debug!("Model output shape: {:?}", dims);

        let candidates = decode_output(&dims, data, COCO_CLASSES.len(), self.score_floor)?;
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_model_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = ModelConfig {
            path: dir.path().join("absent.onnx"),
            ..ModelConfig::default()
        };

        match OnnxDetector::load(&config, 0.25) {
            Err(ModelError::NotFound(path)) => assert_eq!(path, config.path),
            Err(other) => panic!("Expected NotFound, got {:?}", other),
            Ok(_) => panic!("loaded a model that does not exist"),
        }
    }

    #[test]
    fn test_load_detector_reports_missing_model() {
        let dir = TempDir::new().unwrap();
        let config = ModelConfig {
            path: dir.path().join("yolov8n.onnx"),
            ..ModelConfig::default()
        };

        let err = crate::models::load_detector(&config, 0.25).err().unwrap();
        assert!(matches!(err, ModelError::NotFound(_)));
    }
}
