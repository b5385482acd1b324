// HTTP surface of the inference engine

use crate::engine::{InferenceEngine, SERVICE_NAME};
use argus_core::{
    ArgusError, ArtifactStore, DetectResponse, HealthStatus, Result, ServiceInfo,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Multipart framing allowance on top of the image cap
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct EngineState {
    pub engine: Arc<InferenceEngine>,
    pub store: Arc<ArtifactStore>,
    pub max_image_bytes: usize,
}

pub fn create_router(state: EngineState) -> Router {
    let body_limit = state.max_image_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/detect", post(detect_handler))
        .route("/results/:filename", get(result_image_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler(State(state): State<EngineState>) -> impl IntoResponse {
    Json(ServiceInfo {
        status: HealthStatus::from_ok(state.engine.model_loaded()),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: Some(state.engine.model_name().to_string()),
    })
}

async fn health_handler(State(state): State<EngineState>) -> impl IntoResponse {
    let health = state.engine.health();
    let status = if health.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

struct UploadedImage {
    name: String,
    bytes: Bytes,
}

async fn read_image_field(multipart: &mut Multipart, max_bytes: usize) -> Result<UploadedImage> {
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name != "file" && field_name != "image" {
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
                return Err(ArgusError::Validation("File must be an image".to_string()));
            }
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ArgusError::Validation("Uploaded file is empty".to_string()));
        }
        if bytes.len() > max_bytes {
            return Err(ArgusError::Validation(format!(
                "File too large: {} bytes (max {} bytes)",
                bytes.len(),
                max_bytes
            )));
        }
        return Ok(UploadedImage { name, bytes });
    }
    Err(ArgusError::Validation("No image file provided".to_string()))
}

async fn detect_handler(
    State(state): State<EngineState>,
    mut multipart: Multipart,
) -> Result<Json<DetectResponse>> {
    let upload = read_image_field(&mut multipart, state.max_image_bytes).await?;
    info!("Processing image: {}", upload.name);

    let outcome = state.engine.detect(&upload.name, upload.bytes).await?;

    Ok(Json(DetectResponse {
        image_name: upload.name,
        image_size: outcome.image_size,
        detections_count: outcome.detections.len(),
        detections: outcome.detections,
        rendered_image: base64::encode(&outcome.rendered_jpeg),
        inference_ms: outcome.inference_ms,
        model: state.engine.model_name().to_string(),
    }))
}

async fn result_image_handler(
    State(state): State<EngineState>,
    Path(filename): Path<String>,
) -> Response {
    let path = match state.store.result_image(&filename) {
        Some(path) => path,
        None => return not_found(),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(_) => not_found(),
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Result image not found" })),
    )
        .into_response()
}
