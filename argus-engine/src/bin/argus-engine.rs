// Argus inference engine server

use anyhow::Context;
use argus_core::{init_tracing, wait_for_shutdown, ArtifactStore, EngineConfig};
use argus_engine::{create_router, load_detector, EngineState, InferenceEngine, ModelManager};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "argus-engine")]
#[command(about = "Argus inference engine - object detection over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (JSON, TOML or YAML)
    #[arg(long, short, env = "ARGUS_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// ONNX model file
    #[arg(long)]
    model: Option<PathBuf>,

    /// Minimum confidence for reported detections
    #[arg(long)]
    threshold: Option<f32>,

    /// Storage root shared with the gateway
    #[arg(long)]
    storage_root: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(model) = self.model {
            config.model.path = model;
        }
        if let Some(threshold) = self.threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(root) = self.storage_root {
            config.storage.root = root;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging);
    info!("Starting argus-engine {}", env!("CARGO_PKG_VERSION"));

    let store = ArtifactStore::open(config.storage.clone()).context("preparing storage")?;
    let engine = match load_engine(&config).await {
        Ok(engine) => engine,
        Err(e) if config.fail_on_model_error => {
            error!("Model unavailable: {}", e);
            return Err(anyhow::anyhow!("model unavailable: {}", e));
        }
        Err(e) => {
            warn!("Model unavailable, serving degraded: {}", e);
            InferenceEngine::unavailable(e.to_string(), &config)
        }
    };

    let state = EngineState {
        engine: Arc::new(engine),
        store: Arc::new(store),
        max_image_bytes: config.max_image_bytes,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Inference engine listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("argus-engine stopped");
    Ok(())
}

async fn load_engine(config: &EngineConfig) -> anyhow::Result<InferenceEngine> {
    ModelManager::new(config.model.clone()).ensure_model().await?;
    let detector = tokio::task::spawn_blocking({
        let model = config.model.clone();
        let floor = config.confidence_threshold;
        move || load_detector(&model, floor)
    })
    .await??;
    Ok(InferenceEngine::new(detector, config)?)
}
