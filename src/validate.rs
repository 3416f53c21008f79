//! Client-side validation run before a submission touches the registry.
//!
//! A rejected file or URL produces a [`ValidationError`] and nothing else:
//! no record, no request. Everything here is pure so it can run inline in
//! the caller's task.

use crate::config::{IngestConfig, MIME_DOCX, MIME_PDF};
use crate::error::ValidationError;
use std::path::Path;

/// A file selected for upload, already read into memory.
///
/// The size limit keeps this small (10 MiB by default).
#[derive(Clone)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FileUpload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Guess a MIME type from a file extension.
///
/// Only the types the service understands are recognised; anything else
/// maps to `application/octet-stream` and will fail the allow-list.
pub fn mime_from_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        _ => "application/octet-stream",
    }
}

/// Size check alone, usable before the file is read into memory.
pub fn check_size(name: &str, size_bytes: u64, config: &IngestConfig) -> Result<(), ValidationError> {
    if size_bytes > config.max_file_size_bytes {
        return Err(ValidationError::FileTooLarge {
            name: name.to_string(),
            size_bytes,
            max_bytes: config.max_file_size_bytes,
        });
    }
    Ok(())
}

/// Validate a file submission against the allow-list and size limit.
pub fn validate_file(file: &FileUpload, config: &IngestConfig) -> Result<(), ValidationError> {
    if file.name.trim().is_empty() {
        return Err(ValidationError::MissingFileName);
    }

    // MIME parameters (`; charset=…`) are irrelevant for the allow-list.
    let essence = file
        .mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    let allowed = config
        .allowed_mime_types
        .iter()
        .any(|m| m.eq_ignore_ascii_case(essence));
    if !allowed {
        return Err(ValidationError::UnsupportedMimeType {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            allowed: config.allowed_types_label(),
        });
    }

    check_size(&file.name, file.size_bytes(), config)?;

    if file.bytes.is_empty() {
        return Err(ValidationError::EmptyFile {
            name: file.name.clone(),
        });
    }
    Ok(())
}

/// Validate a URL submission: non-empty, absolute, http or https.
///
/// Returns the trimmed URL that should be sent to the service.
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let parsed = reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::UnsupportedScheme {
                url: url.to_string(),
                scheme: other.to_string(),
            })
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(url.to_string())
}
