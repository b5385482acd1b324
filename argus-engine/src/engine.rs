//! Inference engine: decode, letterbox, run the model, post-process, render

use crate::models::Detector;
use crate::postprocess::{postprocess, PostprocessConfig};
use crate::preprocess::{decode_image, prepare_input};
use crate::render::Renderer;
use crate::worker::ModelWorker;
use argus_core::{
    ArgusError, Detection, EngineConfig, EngineHealth, HealthStatus, ImageSize, Result,
};
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "argus-engine";

/// Result of one detect call
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub image_size: ImageSize,
    pub detections: Vec<Detection>,
    /// Annotated copy of the input, JPEG-encoded
    pub rendered_jpeg: Vec<u8>,
    pub inference_ms: u64,
}

enum ModelState {
    Ready(ModelWorker),
    Unavailable(String),
}

pub struct InferenceEngine {
    model: ModelState,
    model_name: String,
    postprocess: PostprocessConfig,
    timeout: Option<Duration>,
    renderer: Arc<Renderer>,
    results_dir: PathBuf,
}

impl InferenceEngine {
    /// Engine serving `detector`, which is moved onto the model worker thread.
    pub fn new(detector: Box<dyn Detector>, config: &EngineConfig) -> Result<Self> {
        let model_name = detector.name().to_string();
        let worker = ModelWorker::spawn(detector)?;
        Ok(Self::build(ModelState::Ready(worker), model_name, config))
    }

    /// Engine whose model failed to load: reports unhealthy and fails every detect.
    pub fn unavailable(reason: impl Into<String>, config: &EngineConfig) -> Self {
        Self::build(
            ModelState::Unavailable(reason.into()),
            config.model.name.clone(),
            config,
        )
    }

    fn build(model: ModelState, model_name: String, config: &EngineConfig) -> Self {
        Self {
            model,
            model_name,
            postprocess: PostprocessConfig::new(config.confidence_threshold, config.detection_order),
            timeout: config.inference_timeout(),
            renderer: Arc::new(Renderer::from_font_path(config.label_font.as_deref())),
            results_dir: config.storage.result_images_dir(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_loaded(&self) -> bool {
        match &self.model {
            ModelState::Ready(worker) => worker.is_alive(),
            ModelState::Unavailable(_) => false,
        }
    }

    fn worker(&self) -> Result<&ModelWorker> {
        match &self.model {
            ModelState::Ready(worker) if worker.is_alive() => Ok(worker),
            ModelState::Ready(_) => Err(ArgusError::ModelUnavailable(format!(
                "model {} stopped after a failure",
                self.model_name
            ))),
            ModelState::Unavailable(reason) => Err(ArgusError::ModelUnavailable(reason.clone())),
        }
    }

    /// Run detection on one encoded image.
    pub async fn detect(&self, image_name: &str, bytes: Bytes) -> Result<DetectionOutcome> {
        let worker = self.worker()?;
        let target = worker.input_size();

        let (image, input, letterbox) = tokio::task::spawn_blocking(move || {
            let image = decode_image(&bytes)?;
            let (input, letterbox) = prepare_input(&image, target);
            Ok::<_, ArgusError>((image, input, letterbox))
        })
        .await
        .map_err(|e| ArgusError::Internal(format!("preprocessing task failed: {}", e)))??;

        let started = Instant::now();
        let raw = worker.infer(input, self.timeout).await?;
        let inference_ms = started.elapsed().as_millis() as u64;

        let detections = postprocess(&raw, &letterbox, &self.postprocess);
        debug!(
            "{} raw detections, {} after post-processing",
            raw.len(),
            detections.len()
        );

        let renderer = self.renderer.clone();
        let (detections, rendered_jpeg) = tokio::task::spawn_blocking(move || {
            let jpeg = renderer.render_jpeg(&image, &detections)?;
            Ok::<_, ArgusError>((detections, jpeg))
        })
        .await
        .map_err(|e| ArgusError::Internal(format!("rendering task failed: {}", e)))??;

        info!(
            image = image_name,
            width = letterbox.source.width,
            height = letterbox.source.height,
            detections = detections.len(),
            inference_ms,
            "Detection complete"
        );

        Ok(DetectionOutcome {
            image_size: letterbox.source,
            detections,
            rendered_jpeg,
            inference_ms,
        })
    }

    pub fn health(&self) -> EngineHealth {
        let model_loaded = self.model_loaded();
        let gpu_available = match &self.model {
            ModelState::Ready(worker) => worker.gpu_available(),
            ModelState::Unavailable(_) => false,
        };
        EngineHealth {
            status: HealthStatus::from_ok(model_loaded),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
            model: self.model_name.clone(),
            model_loaded,
            gpu_available,
            results_dir: self.results_dir.clone(),
        }
    }
}
