//! Composite health of the gateway and the engine behind it
//!
//! Each monitored target is either healthy or unhealthy, decided solely by the
//! most recent observation. There is no hysteresis and no memory beyond that.

use crate::client::InferenceBackend;
use argus_core::{ArtifactStore, BackendHealth, GatewayHealth, HealthStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "argus-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Storage,
    Engine,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Storage => write!(f, "storage"),
            Target::Engine => write!(f, "engine"),
        }
    }
}

/// Last observed status per target.
///
/// The map drives transition logging and [`HealthAggregator::status`]. It is
/// never consulted by [`HealthAggregator::check`], which always observes afresh.
pub struct HealthAggregator {
    states: RwLock<HashMap<Target, HealthStatus>>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Record the latest observation for `target`, logging any transition.
    pub fn record(&self, target: Target, status: HealthStatus) {
        let previous = self.states.write().insert(target, status);
        match previous {
            Some(prev) if prev == status => {}
            Some(prev) => {
                if status.is_healthy() {
                    info!("{} is {} again (was {})", target, status, prev);
                } else {
                    warn!("{} became {} (was {})", target, status, prev);
                }
            }
            None => info!("{} is {}", target, status),
        }
    }

    /// Last recorded status, if any observation has been made.
    pub fn status(&self, target: Target) -> Option<HealthStatus> {
        self.states.read().get(&target).copied()
    }

    /// Check storage and the engine now and build the composite report.
    pub async fn check(
        &self,
        store: Arc<ArtifactStore>,
        backend: &dyn InferenceBackend,
    ) -> GatewayHealth {
        let storage_writable = tokio::task::spawn_blocking(move || store.check_writable())
            .await
            .unwrap_or(false);
        self.record(Target::Storage, HealthStatus::from_ok(storage_writable));

        let ai_backend = match backend.health().await {
            Ok(engine) => {
                let healthy = engine.status.is_healthy() && engine.model_loaded;
                BackendHealth {
                    status: HealthStatus::from_ok(healthy),
                    reachable: true,
                    model_loaded: engine.model_loaded,
                    gpu_available: engine.gpu_available,
                    error: (!healthy).then(|| "inference engine reports unhealthy".to_string()),
                }
            }
            Err(e) => {
                warn!("Inference engine health check failed: {}", e);
                BackendHealth {
                    status: HealthStatus::Unhealthy,
                    reachable: false,
                    model_loaded: false,
                    gpu_available: false,
                    error: Some(e.to_string()),
                }
            }
        };
        self.record(Target::Engine, ai_backend.status);

        GatewayHealth {
            status: HealthStatus::from_ok(storage_writable && ai_backend.status.is_healthy()),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
            storage_writable,
            ai_backend,
        }
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidatedUpload;
    use argus_core::{ArgusError, DetectResponse, EngineHealth, Result, StorageConfig};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FixedHealth(Option<(HealthStatus, bool)>);

    #[async_trait]
    impl InferenceBackend for FixedHealth {
        async fn detect(&self, _upload: &ValidatedUpload) -> Result<DetectResponse> {
            Err(ArgusError::upstream("not used"))
        }

        async fn health(&self) -> Result<EngineHealth> {
            match self.0 {
                Some((status, model_loaded)) => Ok(EngineHealth {
                    status,
                    service: "argus-engine".to_string(),
                    timestamp: Utc::now(),
                    model: "yolov5n".to_string(),
                    model_loaded,
                    gpu_available: false,
                    results_dir: PathBuf::from("static/results/image"),
                }),
                None => Err(ArgusError::upstream("connection refused")),
            }
        }
    }

    fn store(dir: &TempDir) -> Arc<ArtifactStore> {
        Arc::new(
            ArtifactStore::open(StorageConfig {
                root: dir.path().to_path_buf(),
                public_prefix: "/static".to_string(),
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_latest_observation_wins() {
        let health = HealthAggregator::new();
        assert_eq!(health.status(Target::Engine), None);

        health.record(Target::Engine, HealthStatus::Unhealthy);
        assert_eq!(health.status(Target::Engine), Some(HealthStatus::Unhealthy));
        health.record(Target::Engine, HealthStatus::Healthy);
        assert_eq!(health.status(Target::Engine), Some(HealthStatus::Healthy));
        assert_eq!(health.status(Target::Storage), None);
    }

    #[tokio::test]
    async fn test_check_ignores_earlier_failure() {
        let dir = TempDir::new().unwrap();
        let health = HealthAggregator::new();
        // a failed upload marked the engine down
        health.record(Target::Engine, HealthStatus::Unhealthy);

        let report = health
            .check(store(&dir), &FixedHealth(Some((HealthStatus::Healthy, true))))
            .await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.ai_backend.status, HealthStatus::Healthy);
        assert_eq!(health.status(Target::Engine), Some(HealthStatus::Healthy));
        assert_eq!(health.status(Target::Storage), Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let dir = TempDir::new().unwrap();
        let health = HealthAggregator::new();
        let report = health
            .check(store(&dir), &FixedHealth(Some((HealthStatus::Healthy, true))))
            .await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.storage_writable);
        assert!(report.ai_backend.reachable);
        assert!(report.ai_backend.error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let dir = TempDir::new().unwrap();
        let health = HealthAggregator::new();
        let report = health.check(store(&dir), &FixedHealth(None)).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.ai_backend.reachable);
        assert!(report.ai_backend.error.unwrap().contains("connection refused"));
        assert_eq!(health.status(Target::Engine), Some(HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn test_engine_without_model() {
        let dir = TempDir::new().unwrap();
        let health = HealthAggregator::new();
        let report = health
            .check(store(&dir), &FixedHealth(Some((HealthStatus::Unhealthy, false))))
            .await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.ai_backend.reachable);
        assert!(!report.ai_backend.model_loaded);
    }

    #[tokio::test]
    async fn test_unwritable_storage() {
        let dir = TempDir::new().unwrap();
        let missing = Arc::new(ArtifactStore::new(StorageConfig {
            root: dir.path().join("missing"),
            public_prefix: "/static".to_string(),
        }));
        let health = HealthAggregator::new();
        let report = health
            .check(missing, &FixedHealth(Some((HealthStatus::Healthy, true))))
            .await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.storage_writable);
        assert_eq!(report.ai_backend.status, HealthStatus::Healthy);
    }
}
