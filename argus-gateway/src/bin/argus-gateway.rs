// Argus gateway server

use anyhow::Context;
use argus_core::{init_tracing, wait_for_shutdown, ArtifactStore, GatewayConfig};
use argus_gateway::{create_router, EngineClient, GatewayState, UploadPolicy};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "argus-gateway")]
#[command(about = "Argus gateway - image upload front end for the inference engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (JSON, TOML or YAML)
    #[arg(long, short, env = "ARGUS_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Base URL of the inference engine
    #[arg(long)]
    engine_url: Option<String>,

    /// Storage root for uploads and results
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Upload size cap in bytes
    #[arg(long)]
    max_upload_bytes: Option<usize>,

    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(url) = self.engine_url {
            config.engine_url = url;
        }
        if let Some(root) = self.storage_root {
            config.storage.root = root;
        }
        if let Some(max) = self.max_upload_bytes {
            config.max_upload_bytes = max;
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
    let mut config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging);
    info!("Starting argus-gateway {}", env!("CARGO_PKG_VERSION"));
    info!("Inference engine at {}", config.engine_url);

    let store = ArtifactStore::open(config.storage.clone()).context("preparing storage")?;
    let client = EngineClient::new(&config).context("building engine client")?;
    let state = GatewayState::new(
        Arc::new(client),
        Arc::new(store),
        UploadPolicy::from_config(&config),
    );
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("argus-gateway stopped");
    Ok(())
}
