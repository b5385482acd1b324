//! Argus inference engine
//!
//! Owns the single detection model instance and exposes `detect` over HTTP.
//! Requests decode and render in parallel; model calls are serialized through
//! [`worker::ModelWorker`].

pub mod engine;
pub mod error;
pub mod http;
pub mod models;
pub mod postprocess;
pub mod preprocess;
pub mod render;
pub mod worker;

pub use engine::{DetectionOutcome, InferenceEngine, SERVICE_NAME};
pub use error::ModelError;
pub use http::{create_router, EngineState};
pub use models::{load_detector, Detector, ModelInput, ModelManager, RawDetection};
pub use worker::ModelWorker;
