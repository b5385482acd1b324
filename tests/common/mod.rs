// Shared fixtures for the integration tests

#![allow(dead_code)]

use argus_core::{ArtifactStore, EngineConfig, GatewayConfig, StorageConfig};
use argus_engine::{create_router as engine_router, Detector, EngineState, InferenceEngine, ModelError, ModelInput, RawDetection};
use argus_gateway::{create_router as gateway_router, EngineClient, GatewayState, InferenceBackend, UploadPolicy};
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Detector returning a fixed script of raw detections.
///
/// Tracks how many calls run at once so tests can check the model is never
/// entered concurrently.
pub struct ScriptedDetector {
    script: Vec<RawDetection>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

#[derive(Clone, Default)]
pub struct DetectorStats {
    pub max_active: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl DetectorStats {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScriptedDetector {
    pub fn new(script: Vec<RawDetection>) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            max_active: self.max_active.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn input_size(&self) -> (u32, u32) {
        (640, 640)
    }

    fn detect(&mut self, _input: &ModelInput) -> Result<Vec<RawDetection>, ModelError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.script.clone())
    }
}

pub fn raw(class_index: usize, confidence: f32, bbox: [f32; 4]) -> RawDetection {
    RawDetection {
        class_index,
        confidence,
        bbox,
    }
}

/// A person and a dog, in 640x640 model space
pub fn street_script() -> Vec<RawDetection> {
    vec![
        raw(16, 0.61, [320.0, 300.0, 420.0, 400.0]),
        raw(0, 0.93, [100.0, 150.0, 200.0, 450.0]),
    ]
}

pub fn storage(root: &Path) -> StorageConfig {
    StorageConfig {
        root: root.to_path_buf(),
        public_prefix: "/static".to_string(),
    }
}

pub fn engine_config(root: &Path) -> EngineConfig {
    EngineConfig {
        storage: storage(root),
        ..EngineConfig::default()
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start an engine serving `detector` on an ephemeral port.
pub async fn spawn_engine(detector: Box<dyn Detector>, root: &Path) -> SocketAddr {
    let config = engine_config(root);
    let engine = InferenceEngine::new(detector, &config).unwrap();
    let state = EngineState {
        engine: Arc::new(engine),
        store: Arc::new(ArtifactStore::open(config.storage.clone()).unwrap()),
        max_image_bytes: config.max_image_bytes,
    };
    serve(engine_router(state)).await
}

pub fn gateway_config(engine_url: String, root: &Path) -> GatewayConfig {
    GatewayConfig {
        engine_url,
        connect_timeout_ms: 500,
        request_timeout_ms: 5_000,
        retry_backoff_ms: 50,
        health_timeout_ms: 1_000,
        storage: storage(root),
        ..GatewayConfig::default()
    }
}

/// Start a gateway on an ephemeral port in front of `backend`.
pub async fn spawn_gateway(backend: Arc<dyn InferenceBackend>, config: &GatewayConfig) -> SocketAddr {
    let store = ArtifactStore::open(config.storage.clone()).unwrap();
    let state = GatewayState::new(backend, Arc::new(store), UploadPolicy::from_config(config));
    serve(gateway_router(state)).await
}

pub async fn spawn_gateway_for(engine_url: String, root: &Path) -> SocketAddr {
    let config = gateway_config(engine_url, root);
    let client = EngineClient::new(&config).unwrap();
    spawn_gateway(Arc::new(client), &config).await
}

pub fn image_form(field: &str, filename: &str, mime: &str, bytes: Vec<u8>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(mime)
        .unwrap();
    reqwest::multipart::Form::new().part(field.to_string(), part)
}
