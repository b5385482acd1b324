//! Upload pipeline: forward to the engine, assemble the response, persist

use crate::client::InferenceBackend;
use crate::health::{HealthAggregator, Target};
use crate::validation::ValidatedUpload;
use argus_core::{ArgusError, ArtifactStore, HealthStatus, Result, UploadResponse};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub struct UploadService {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<ArtifactStore>,
    health: Arc<HealthAggregator>,
}

impl UploadService {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<ArtifactStore>,
        health: Arc<HealthAggregator>,
    ) -> Self {
        Self {
            backend,
            store,
            health,
        }
    }

    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }

    pub fn store(&self) -> Arc<ArtifactStore> {
        self.store.clone()
    }

    /// Run detection on a validated upload and persist its artifacts.
    ///
    /// The response is only returned once every artifact it references exists.
    pub async fn handle_upload(&self, upload: ValidatedUpload) -> Result<UploadResponse> {
        let request_id = Uuid::new_v4();
        let span = info_span!("upload", %request_id, image = %upload.filename);
        self.process(upload).instrument(span).await
    }

    async fn process(&self, upload: ValidatedUpload) -> Result<UploadResponse> {
        info!(
            width = upload.size.width,
            height = upload.size.height,
            bytes = upload.bytes.len(),
            "Image validated"
        );

        let detected = match self.backend.detect(&upload).await {
            Ok(detected) => {
                self.health.record(Target::Engine, HealthStatus::Healthy);
                detected
            }
            Err(e) => {
                if matches!(e, ArgusError::UpstreamUnavailable { .. }) {
                    self.health.record(Target::Engine, HealthStatus::Unhealthy);
                }
                return Err(e);
            }
        };
        info!("Detection successful: {} objects found", detected.detections_count);

        let rendered = base64::decode(&detected.rendered_image)
            .map_err(|e| ArgusError::upstream(format!("engine sent an undecodable rendered image: {}", e)))?;

        let set = self.store.allocate(&upload.filename);
        let response = UploadResponse {
            success: true,
            image_name: upload.filename.clone(),
            image_size: detected.image_size,
            detections_count: detected.detections.len(),
            detections: detected.detections,
            result_image: set.image_url.clone(),
            result_json: set.metadata_url.clone(),
            timestamp: Utc::now(),
        };

        let store = self.store.clone();
        let metadata = response.clone();
        let original = upload.bytes;
        let persisted = tokio::task::spawn_blocking(move || {
            store.persist(&set, &original, &rendered, &metadata)
        })
        .await
        .map_err(|e| ArgusError::Internal(format!("persistence task failed: {}", e)))?;

        match persisted {
            Ok(artifacts) => {
                self.health.record(Target::Storage, HealthStatus::Healthy);
                info!(
                    result_image = %artifacts.result_image,
                    result_json = %artifacts.result_json,
                    "Upload complete"
                );
                Ok(response)
            }
            Err(e) => {
                self.health.record(Target::Storage, HealthStatus::Unhealthy);
                Err(e)
            }
        }
    }
}
