//! Argus gateway
//!
//! Front door of the detection service: validates uploads, forwards them to
//! the inference engine, persists the results and reports composite health.

pub mod client;
pub mod health;
pub mod http;
pub mod upload;
pub mod validation;

pub use client::{EngineClient, InferenceBackend};
pub use health::{HealthAggregator, Target, SERVICE_NAME};
pub use http::{create_router, GatewayState};
pub use upload::UploadService;
pub use validation::{read_upload, validate_upload, UploadPolicy, ValidatedUpload};
