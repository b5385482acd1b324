// Argus core: shared data model, error taxonomy, configuration and artifact storage

pub mod artifacts;
pub mod config;
pub mod detection;
pub mod error;
pub mod health;
pub mod logging;
pub mod shutdown;

pub use artifacts::{secure_filename, ArtifactSet, ArtifactStore, PersistedArtifacts};
pub use config::{
    ConfigError, DetectionOrder, EngineConfig, GatewayConfig, ModelConfig, StorageConfig,
};
pub use detection::{
    assign_object_ids, class_label, BoundingBox, DetectResponse, Detection, ImageSize, Point,
    UploadResponse, COCO_CLASSES,
};
pub use error::{ArgusError, ErrorBody, ErrorKind, Result};
pub use health::{BackendHealth, EngineHealth, GatewayHealth, HealthStatus, ServiceInfo};
pub use logging::{init_tracing, LoggingConfig};
pub use shutdown::wait_for_shutdown;
