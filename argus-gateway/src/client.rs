//! Client for the inference engine

use crate::validation::ValidatedUpload;
use argus_core::{ArgusError, DetectResponse, EngineHealth, ErrorBody, GatewayConfig, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest engine error text echoed back to clients
const MAX_ERROR_TEXT: usize = 512;

/// Anything that can run detection for the gateway
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn detect(&self, upload: &ValidatedUpload) -> Result<DetectResponse>;

    /// Current engine health; an error means the engine could not be reached.
    async fn health(&self) -> Result<EngineHealth>;
}

pub struct EngineClient {
    http: Client,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    health_timeout: Duration,
}

impl EngineClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ArgusError::Internal(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.engine_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            health_timeout: config.health_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn form(upload: &ValidatedUpload) -> Result<Form> {
        let part = Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| ArgusError::Internal(format!("invalid content type: {}", e)))?;
        Ok(Form::new().part("file", part))
    }

    async fn read_detect_response(response: Response) -> Result<DetectResponse> {
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(peer_error(status, &body));
        }

        let detect: DetectResponse = serde_json::from_slice(&body)
            .map_err(|e| ArgusError::upstream(format!("malformed engine response: {}", e)))?;
        if detect.detections_count != detect.detections.len() {
            return Err(ArgusError::upstream(format!(
                "engine reported {} detections but sent {}",
                detect.detections_count,
                detect.detections.len()
            )));
        }
        Ok(detect)
    }
}

#[async_trait]
impl InferenceBackend for EngineClient {
    async fn detect(&self, upload: &ValidatedUpload) -> Result<DetectResponse> {
        let url = format!("{}/detect", self.base_url);
        let mut attempt = 0;

        loop {
            info!("Sending to inference engine: {} (attempt {})", url, attempt + 1);
            // a multipart form is consumed by the send, so rebuild it per attempt
            let form = Self::form(upload)?;
            match self.http.post(&url).multipart(form).send().await {
                Ok(response) => return Self::read_detect_response(response).await,
                Err(e) if is_retryable(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Inference engine request failed before a response ({}), retrying in {:?}",
                        e, self.retry_backoff
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(transport_error(e)),
            }
        }
    }

    async fn health(&self) -> Result<EngineHealth> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        // an unhealthy engine still answers with its report
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice::<EngineHealth>(&body).map_err(|e| {
            debug!("Unreadable engine health body ({}): {}", status, e);
            ArgusError::upstream(format!("engine health returned {} with an unreadable body", status))
        })
    }
}

/// A send that failed before any response arrived: refused connections and
/// pooled connections the engine already closed. Timeouts are never retried.
fn is_retryable(err: &reqwest::Error) -> bool {
    !err.is_timeout() && (err.is_connect() || err.is_request())
}

fn transport_error(err: reqwest::Error) -> ArgusError {
    if err.is_timeout() {
        ArgusError::upstream_timeout(format!("inference engine request timed out: {}", err))
    } else if err.is_connect() {
        ArgusError::upstream(format!(
            "Cannot connect to inference engine. Please ensure it's running. ({})",
            err
        ))
    } else {
        ArgusError::upstream(format!("error communicating with inference engine: {}", err))
    }
}

fn peer_error(status: StatusCode, body: &[u8]) -> ArgusError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(error_body) => ArgusError::from_peer_body(error_body),
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let text: String = text.chars().take(MAX_ERROR_TEXT).collect();
            ArgusError::upstream(format!("inference engine error {}: {}", status, text))
        }
    }
}
