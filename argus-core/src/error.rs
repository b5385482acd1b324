use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Every failure a client can observe maps to exactly one of these.
#[derive(Error, Debug)]
pub enum ArgusError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Inference engine unavailable: {message}")]
    UpstreamUnavailable { message: String, timed_out: bool },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ArgusError>;

/// Machine-readable error kind carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    InvalidImage,
    UpstreamUnavailable,
    ModelUnavailable,
    InferenceTimeout,
    PersistenceError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::InferenceTimeout => "inference_timeout",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

/// JSON body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub kind: ErrorKind,
    pub error: String,
}

impl ArgusError {
    pub fn upstream(message: impl Into<String>) -> Self {
        ArgusError::UpstreamUnavailable {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        ArgusError::UpstreamUnavailable {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ArgusError::Validation(_) => ErrorKind::ValidationError,
            ArgusError::InvalidImage(_) => ErrorKind::InvalidImage,
            ArgusError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            ArgusError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            ArgusError::InferenceTimeout(_) => ErrorKind::InferenceTimeout,
            ArgusError::Persistence(_) => ErrorKind::PersistenceError,
            ArgusError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ArgusError::Validation(_) | ArgusError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ArgusError::UpstreamUnavailable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            ArgusError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ArgusError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ArgusError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ArgusError::Persistence(_) | ArgusError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            kind: self.kind(),
            error: self.to_string(),
        }
    }

    /// Rebuild an error reported by a peer service, as seen by its caller.
    ///
    /// Client-input failures keep their kind; anything the peer could not do
    /// itself means the peer is unavailable to us.
    pub fn from_peer_body(body: ErrorBody) -> Self {
        match body.kind {
            ErrorKind::ValidationError => ArgusError::Validation(body.error),
            ErrorKind::InvalidImage => ArgusError::InvalidImage(body.error),
            ErrorKind::InferenceTimeout => ArgusError::upstream_timeout(body.error),
            _ => ArgusError::upstream(body.error),
        }
    }
}

impl IntoResponse for ArgusError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind().as_str(), "request failed: {}", self);
        } else {
            warn!(kind = self.kind().as_str(), "request rejected: {}", self);
        }
        (status, Json(self.to_body())).into_response()
    }
}

impl From<std::io::Error> for ArgusError {
    fn from(err: std::io::Error) -> Self {
        ArgusError::Persistence(err.to_string())
    }
}

impl From<MultipartError> for ArgusError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ArgusError::Validation("File too large".to_string())
        } else {
            ArgusError::Validation(format!("Malformed upload: {}", err.body_text()))
        }
    }
}
