//! Upload validation: nothing reaches the engine unless it passes here

use argus_core::{secure_filename, ArgusError, GatewayConfig, ImageSize, Result};
use axum::extract::Multipart;
use bytes::Bytes;
use image::ImageReader;
use std::io::Cursor;

/// Multipart field names accepted for the image, in preference order
pub const IMAGE_FIELDS: &[&str] = &["image", "file"];

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allowed_file(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }

    fn allowed_list(&self) -> String {
        self.allowed_extensions.join(", ")
    }
}

/// An upload that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    /// Sanitized file name
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub size: ImageSize,
}

/// Check one uploaded file against `policy`.
pub fn validate_upload(
    policy: &UploadPolicy,
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: Bytes,
) -> Result<ValidatedUpload> {
    let original = match filename {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(ArgusError::Validation("No file selected".to_string())),
    };
    let filename = secure_filename(original);
    if !policy.allowed_file(&filename) {
        return Err(ArgusError::Validation(format!(
            "Invalid file type. Allowed: {}",
            policy.allowed_list()
        )));
    }

    let content_type = match content_type {
        Some(ct) if ct.starts_with("image/") || ct == "application/octet-stream" => ct.to_string(),
        Some(ct) => {
            return Err(ArgusError::Validation(format!(
                "Unsupported content type '{}'",
                ct
            )))
        }
        None => "application/octet-stream".to_string(),
    };

    if bytes.is_empty() {
        return Err(ArgusError::Validation("Uploaded file is empty".to_string()));
    }
    if bytes.len() > policy.max_bytes {
        return Err(ArgusError::Validation(format!(
            "File too large: {} bytes (max {} bytes)",
            bytes.len(),
            policy.max_bytes
        )));
    }

    let size = sniff_dimensions(&bytes)?;
    Ok(ValidatedUpload {
        filename,
        content_type,
        bytes,
        size,
    })
}

/// Read the image dimensions from the header without decoding pixels.
pub fn sniff_dimensions(bytes: &[u8]) -> Result<ImageSize> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ArgusError::InvalidImage(e.to_string()))?
        .into_dimensions()
        .map_err(|_| ArgusError::InvalidImage("Invalid image file".to_string()))?;
    if width == 0 || height == 0 {
        return Err(ArgusError::InvalidImage("Invalid image file".to_string()));
    }
    Ok(ImageSize::new(width, height))
}

/// Pull the image part out of a multipart body and validate it.
pub async fn read_upload(multipart: &mut Multipart, policy: &UploadPolicy) -> Result<ValidatedUpload> {
    while let Some(field) = multipart.next_field().await? {
        let is_image_field = field
            .name()
            .map(|name| IMAGE_FIELDS.contains(&name))
            .unwrap_or(false);
        if !is_image_field {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        return validate_upload(policy, filename.as_deref(), content_type.as_deref(), bytes);
    }
    Err(ArgusError::Validation("No image file provided".to_string()))
}
