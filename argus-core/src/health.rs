//! Health report wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Inference engine health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub model_loaded: bool,
    pub gpu_available: bool,
    pub results_dir: PathBuf,
}

/// The gateway's view of the inference engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub reachable: bool,
    pub model_loaded: bool,
    pub gpu_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composite gateway health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub storage_writable: bool,
    pub ai_backend: BackendHealth,
}

/// Response of `GET /` on either service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
