//! Model manager with auto-download functionality

use crate::error::ModelError;
use argus_core::ModelConfig;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const MAX_MODEL_SIZE: u64 = 2_000_000_000;
const MIN_MODEL_SIZE: usize = 1024;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Makes sure the configured model file is present before it is loaded
pub struct ModelManager {
    config: ModelConfig,
}

impl ModelManager {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    /// Return the model path, downloading the model first when it is missing
    /// and a URL is configured.
    pub async fn ensure_model(&self) -> Result<PathBuf, ModelError> {
        let model_path = &self.config.path;
        if model_path.exists() {
            info!("Model {} found at {:?}", self.config.name, model_path);
            return Ok(model_path.clone());
        }

        let url = match &self.config.url {
            Some(url) => url,
            None => return Err(ModelError::NotFound(model_path.clone())),
        };
        validate_url(url)?;

        info!("Downloading model {} from {}", self.config.name, url);
        let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(ModelError::Download(format!("HTTP {}", response.status())));
        }
        if let Some(content_length) = response.content_length() {
            if content_length > MAX_MODEL_SIZE {
                return Err(ModelError::Download(format!(
                    "model too large: {} bytes (max {} bytes)",
                    content_length, MAX_MODEL_SIZE
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 > MAX_MODEL_SIZE {
            return Err(ModelError::Download(format!(
                "downloaded model too large: {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() < MIN_MODEL_SIZE {
            return Err(ModelError::Download(
                "downloaded file too small, likely corrupted".to_string(),
            ));
        }

        match &self.config.sha256 {
            Some(expected) => {
                verify_checksum(&bytes, expected)?;
                info!("Verified checksum for model {}", self.config.name);
            }
            None => info!(
                "Downloaded {} bytes for model {} (checksum verification skipped)",
                bytes.len(),
                self.config.name
            ),
        }

        write_atomic(model_path, &bytes)?;
        info!("Model {} saved to {:?}", self.config.name, model_path);
        Ok(model_path.clone())
    }
}

fn validate_url(url: &str) -> Result<(), ModelError> {
    if url.is_empty() || url.len() > 2048 {
        return Err(ModelError::Download("invalid model URL".to_string()));
    }
    if !url.starts_with("https://") {
        return Err(ModelError::Download(
            "only HTTPS URLs are allowed for model downloads".to_string(),
        ));
    }
    Ok(())
}

/// Compare the SHA-256 of `bytes` against a hex digest (case-insensitive).
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), ModelError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let computed = hex::encode(hasher.finalize());
    if computed.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ModelError::Download(format!(
            "checksum mismatch: expected {}, got {}",
            expected, computed
        )))
    }
}

// Temp file in the destination directory, then rename over the final path.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ModelError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ModelError::Io(e.error))?;
    Ok(())
}
