//! Pre-flight validation of files selected for analysis.

use crate::request::UploadFile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extensions rejected regardless of the declared content type.
pub const BLOCKED_EXTENSIONS: &[&str] = &[".exe", ".bat", ".cmd", ".scr", ".pif"];

pub const DEFAULT_MAX_SIZE_MB: u64 = 500;

/// Every rule the file violated, in check order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Upload rejected: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub max_size_bytes: u64,
    /// Exact MIME types or `type/*` wildcards.
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_MB * 1024 * 1024,
            allowed_types: vec!["image/*".to_string(), "video/*".to_string()],
        }
    }
}

impl UploadPolicy {
    pub fn new(max_size_mb: u64, allowed_types: Vec<String>) -> Self {
        Self {
            max_size_bytes: max_size_mb.saturating_mul(1024 * 1024),
            allowed_types,
        }
    }

    pub fn allows_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_types.iter().any(|allowed| {
            let allowed = allowed.trim().to_ascii_lowercase();
            match allowed.strip_suffix('*') {
                Some(prefix) => content_type.starts_with(prefix),
                None => content_type == allowed,
            }
        })
    }

    pub fn validate(&self, file: &UploadFile) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if file.file_name.trim().is_empty() {
            errors.push("No file selected".to_string());
        }
        if file.size() > self.max_size_bytes {
            errors.push(format!(
                "File size exceeds {:.1}MB limit",
                self.max_size_bytes as f64 / 1024.0 / 1024.0
            ));
        }
        if !self.allows_type(&file.content_type) {
            errors.push("File type not supported".to_string());
        }
        let name = file.file_name.to_ascii_lowercase();
        if BLOCKED_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            errors.push("File type not allowed for security reasons".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }
}

/// Guess a MIME type from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
