//! Error types for argus-engine

use argus_core::ArgusError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Model worker stopped: {0}")]
    WorkerStopped(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for ArgusError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Inference(msg) => ArgusError::Internal(format!("Inference failed: {}", msg)),
            other => ArgusError::ModelUnavailable(other.to_string()),
        }
    }
}
