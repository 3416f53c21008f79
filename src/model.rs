//! Document records, identifiers and wire types.
//!
//! A record is created optimistically with a client-side [`DocumentId`] the
//! moment a submission passes validation. The server-side identifiers
//! ([`ServerId`], [`JobId`]) are attached later, once the upload response
//! arrives; that two-phase commit is what lets the record be shown before
//! the network call finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Client-assigned document identifier, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Server-issued document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side processing job identifier, used for status queries.
///
/// Distinct from [`ServerId`]: one document may be processed by a job with
/// an unrelated identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Url,
}

/// Lifecycle status of a document.
///
/// ```text
/// Uploading ──▶ Processing ──▶ Completed
///     │              ├───────▶ Failed
///     │              └───────▶ Unknown
///     └──────────────────────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
    Unknown,
}

impl DocumentStatus {
    /// Terminal states accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Unknown
        )
    }

    /// Position in the forward-only lifecycle; terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            DocumentStatus::Uploading => 0,
            DocumentStatus::Processing => 1,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Unknown => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// `Unknown` is only reachable from `Processing` (the poller gave up).
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        !(next == DocumentStatus::Unknown && self != DocumentStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted document as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub server_id: Option<ServerId>,
    pub job_id: Option<JobId>,
    /// File name or source URL.
    pub name: String,
    pub source_kind: SourceKind,
    /// Present only for [`SourceKind::File`].
    pub size_bytes: Option<u64>,
    /// Present only for [`SourceKind::File`].
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: DocumentStatus,
    /// 0–100, meaningful only while `status` is `Uploading`.
    pub upload_progress_percent: u8,
    /// Last server-provided detail or local failure reason.
    pub detail: Option<String>,
}

/// Byte-level progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl UploadProgress {
    /// Rounded percentage, clamped to 0–100. An empty body counts as done.
    pub fn percent(&self) -> u8 {
        if self.bytes_total == 0 {
            return 100;
        }
        let sent = self.bytes_sent.min(self.bytes_total) as u128;
        ((sent * 100 + self.bytes_total as u128 / 2) / self.bytes_total as u128) as u8
    }
}

/// Identifiers handed back by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub server_id: ServerId,
    pub job_id: JobId,
}

/// Processing status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Processing,
    Completed,
    Failed,
    /// Any other value (`queued`, `pending`, …); treated as non-terminal.
    Other(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "processing" => RemoteStatus::Processing,
            "completed" => RemoteStatus::Completed,
            "failed" => RemoteStatus::Failed,
            _ => RemoteStatus::Other(raw.to_string()),
        }
    }

    /// Document status this remote status maps to.
    pub fn document_status(&self) -> DocumentStatus {
        match self {
            RemoteStatus::Completed => DocumentStatus::Completed,
            RemoteStatus::Failed => DocumentStatus::Failed,
            RemoteStatus::Processing | RemoteStatus::Other(_) => DocumentStatus::Processing,
        }
    }
}

/// One answer from the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: RemoteStatus,
    pub detail: Option<String>,
}

// ── Wire DTOs ────────────────────────────────────────────────────────────

/// Body of `POST /api/documents/upload` and `/upload-url` responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    pub document_id: ServerId,
    #[serde(alias = "jobId")]
    pub processing_job_id: JobId,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl From<UploadResponse> for UploadReceipt {
    fn from(r: UploadResponse) -> Self {
        UploadReceipt {
            server_id: r.document_id,
            job_id: r.processing_job_id,
        }
    }
}

/// Body of `POST /api/documents/upload-url`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UrlUploadRequest<'a> {
    pub url: &'a str,
}

/// Body of `GET /api/documents/status/{job}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl From<StatusResponse> for StatusReport {
    fn from(r: StatusResponse) -> Self {
        StatusReport {
            status: RemoteStatus::parse(&r.status),
            detail: r.detail,
        }
    }
}

// The service is not consistent about id types: accept `42` and `"42"`.
impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(ServerId)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(JobId)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}
