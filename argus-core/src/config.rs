// Configuration for the engine and gateway services
//
// Values are layered: defaults, then an optional file (JSON, TOML or YAML),
// then ARGUS_* environment variables. Binaries apply CLI flags last and call
// `validate()` before serving.

use crate::logging::LoggingConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default upload cap (16 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Extensions accepted by the gateway
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Shared on-disk layout for uploaded originals and results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the artifact tree
    pub root: PathBuf,
    /// URL prefix under which `root` is served
    pub public_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./static"),
            public_prefix: "/static".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn result_images_dir(&self) -> PathBuf {
        self.results_dir().join("image")
    }

    pub fn result_json_dir(&self) -> PathBuf {
        self.results_dir().join("json")
    }
}

/// Order in which detections are numbered and returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionOrder {
    /// Highest confidence first; ties keep model order
    Confidence,
    /// Exactly as the model emitted them
    Emission,
}

/// Detection model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// ONNX model file
    pub path: PathBuf,
    /// Optional HTTPS URL to fetch the model from when `path` is missing
    pub url: Option<String>,
    /// Optional hex SHA-256 of the downloaded model
    pub sha256: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    /// IoU above which overlapping same-class boxes are suppressed
    pub iou_threshold: f32,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "yolov5n".to_string(),
            path: PathBuf::from("./models/yolov5n.onnx"),
            url: None,
            sha256: None,
            input_width: 640,
            input_height: 640,
            iou_threshold: 0.45,
            intra_threads: 1,
        }
    }
}

/// Inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bind_address: String,
    pub model: ModelConfig,
    /// Detections below this confidence are dropped
    pub confidence_threshold: f32,
    pub detection_order: DetectionOrder,
    /// Upper bound for one model call; 0 disables the bound
    pub inference_timeout_ms: u64,
    pub max_image_bytes: usize,
    /// TTF/OTF font used for box labels; labels are drawn without text when unset
    pub label_font: Option<PathBuf>,
    /// Exit at startup when the model cannot be loaded
    pub fail_on_model_error: bool,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8001".to_string(),
            model: ModelConfig::default(),
            confidence_threshold: 0.25,
            detection_order: DetectionOrder::Confidence,
            inference_timeout_ms: 60_000,
            max_image_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            label_font: None,
            fail_on_model_error: true,
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_file(path)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        parse_config(content)
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("ARGUS_ENGINE_BIND") {
            self.bind_address = addr;
        }
        if let Ok(path) = std::env::var("ARGUS_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("ARGUS_MODEL_URL") {
            self.model.url = Some(url);
        }
        if let Some(threshold) = env_parse("ARGUS_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = threshold;
        }
        if let Some(timeout) = env_parse("ARGUS_INFERENCE_TIMEOUT_MS") {
            self.inference_timeout_ms = timeout;
        }
        if let Ok(font) = std::env::var("ARGUS_LABEL_FONT") {
            self.label_font = Some(PathBuf::from(font));
        }
        apply_shared_env(&mut self.storage, &mut self.logging);
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        (self.inference_timeout_ms > 0).then(|| Duration::from_millis(self.inference_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ValidationError(
                "confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(ConfigError::ValidationError(
                "model.iou_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(ConfigError::ValidationError(
                "model input resolution must be non-zero".to_string(),
            ));
        }
        if self.model.input_width > 4096 || self.model.input_height > 4096 {
            return Err(ConfigError::ValidationError(
                "model input resolution too large (max 4096)".to_string(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_image_bytes must be > 0".to_string(),
            ));
        }
        validate_bind(&self.bind_address)?;
        validate_storage(&self.storage)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    /// Base URL of the inference engine
    pub engine_url: String,
    pub connect_timeout_ms: u64,
    /// Upper bound for one detect round trip
    pub request_timeout_ms: u64,
    /// Extra attempts after a connection failure
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub health_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            engine_url: "http://127.0.0.1:8001".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_retries: 1,
            retry_backoff_ms: 250,
            health_timeout_ms: 5_000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_file(path)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        parse_config(content)
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("ARGUS_GATEWAY_BIND") {
            self.bind_address = addr;
        }
        // AI_BACKEND_URL is the name older deployments use
        if let Ok(url) = std::env::var("ARGUS_ENGINE_URL").or_else(|_| std::env::var("AI_BACKEND_URL")) {
            self.engine_url = url;
        }
        if let Some(timeout) = env_parse("ARGUS_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = timeout;
        }
        if let Some(retries) = env_parse("ARGUS_MAX_RETRIES") {
            self.max_retries = retries;
        }
        if let Some(max) = env_parse("ARGUS_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = max;
        }
        apply_shared_env(&mut self.storage, &mut self.logging);
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.engine_url.starts_with("http://") || self.engine_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "engine_url must be an http(s) URL, got '{}'",
                self.engine_url
            )));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 || self.health_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0".to_string(),
            ));
        }
        if self.max_retries > 5 {
            return Err(ConfigError::ValidationError(
                "max_retries too large (max 5)".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_upload_bytes must be > 0".to_string(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "allowed_extensions cannot be empty".to_string(),
            ));
        }
        validate_bind(&self.bind_address)?;
        validate_storage(&self.storage)
    }
}

fn apply_shared_env(storage: &mut StorageConfig, logging: &mut LoggingConfig) {
    if let Ok(root) = std::env::var("ARGUS_STORAGE_ROOT") {
        storage.root = PathBuf::from(root);
    }
    if let Ok(level) = std::env::var("ARGUS_LOG_LEVEL") {
        logging.level = level;
    }
    if let Some(json) = env_parse("ARGUS_LOG_JSON") {
        logging.json = json;
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}

fn validate_bind(addr: &str) -> Result<(), ConfigError> {
    addr.parse::<std::net::SocketAddr>()
        .map(|_| ())
        .map_err(|e| ConfigError::ValidationError(format!("invalid bind address '{}': {}", addr, e)))
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.root cannot be empty".to_string(),
        ));
    }
    if !storage.public_prefix.starts_with('/') || storage.public_prefix.ends_with('/') {
        return Err(ConfigError::ValidationError(
            "storage.public_prefix must start with '/' and not end with '/'".to_string(),
        ));
    }
    Ok(())
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    parse_config(&content)
}

fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    // Try JSON first
    if let Ok(config) = serde_json::from_str::<T>(content) {
        return Ok(config);
    }

    // Try TOML
    let toml_err = match toml::from_str::<T>(content) {
        Ok(config) => return Ok(config),
        Err(e) => e,
    };

    // Try YAML
    if let Ok(config) = serde_yaml::from_str::<T>(content) {
        return Ok(config);
    }

    Err(ConfigError::ParseError(format!(
        "not valid JSON, TOML or YAML (toml: {})",
        toml_err
    )))
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
