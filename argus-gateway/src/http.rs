// HTTP surface of the gateway

use crate::client::InferenceBackend;
use crate::health::{HealthAggregator, SERVICE_NAME};
use crate::upload::UploadService;
use crate::validation::{read_upload, UploadPolicy};
use argus_core::{ArtifactStore, HealthStatus, Result, ServiceInfo, UploadResponse};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Multipart framing allowance on top of the upload cap
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<UploadService>,
    pub health: Arc<HealthAggregator>,
    pub backend: Arc<dyn InferenceBackend>,
    pub store: Arc<ArtifactStore>,
    pub policy: Arc<UploadPolicy>,
}

impl GatewayState {
    pub fn new(backend: Arc<dyn InferenceBackend>, store: Arc<ArtifactStore>, policy: UploadPolicy) -> Self {
        let health = Arc::new(HealthAggregator::new());
        let service = Arc::new(UploadService::new(backend.clone(), store.clone(), health.clone()));
        Self {
            service,
            health,
            backend,
            store,
            policy: Arc::new(policy),
        }
    }
}

pub fn create_router(state: GatewayState) -> Router {
    let body_limit = state.policy.max_bytes.saturating_add(MULTIPART_OVERHEAD);
    let static_files = ServeDir::new(state.store.root());
    let prefix = state.store.config().public_prefix.trim_end_matches('/').to_string();

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .nest_service(&prefix, static_files)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(ServiceInfo {
        status: HealthStatus::Healthy,
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: None,
    })
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let report = state.health.check(state.store.clone(), state.backend.as_ref()).await;
    let status = if report.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn upload_handler(
    State(state): State<GatewayState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let upload = read_upload(&mut multipart, &state.policy).await?;
    let response = state.service.handle_upload(upload).await?;
    Ok(Json(response))
}
