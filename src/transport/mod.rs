//! Transport client: the only layer that talks to the ingestion service.
//!
//! The workflow engine and the poller depend on the [`Transport`] trait, not
//! on reqwest, so tests can script the service in-process and a different
//! backend can be plugged in without touching the state machine.
//!
//! ## Contract
//!
//! ```text
//! submit_file  ──▶ progress* ──▶ Result<UploadReceipt, TransportError>
//! submit_url   ──────────────▶ Result<UploadReceipt, TransportError>
//! fetch_status ──────────────▶ Result<StatusReport,  TransportError>
//! ```
//!
//! Errors are returned, never panicked, so callers choose the retry policy.
//! Session credentials ride along implicitly (cookie jar or bearer token
//! configured on the client); the transport never manages auth state.

pub(crate) mod http;

pub use http::HttpTransport;

use crate::error::TransportError;
use crate::model::{JobId, StatusReport, UploadProgress, UploadReceipt};
use crate::validate::FileUpload;

/// Receives byte-level progress of one file upload.
///
/// Events arrive in non-decreasing `bytes_sent` order, all before the
/// upload's terminal result is returned.
pub trait UploadProgressSink: Send + Sync {
    fn on_progress(&self, progress: UploadProgress);
}

/// Sink that drops every event.
pub struct NoopProgressSink;

impl UploadProgressSink for NoopProgressSink {
    fn on_progress(&self, _progress: UploadProgress) {}
}

/// Requests the workflow needs from the ingestion service.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Upload a file (`POST /api/documents/upload`, multipart field `file`).
    async fn submit_file(
        &self,
        upload: &FileUpload,
        sink: &dyn UploadProgressSink,
    ) -> Result<UploadReceipt, TransportError>;

    /// Submit a URL for server-side fetching (`POST /api/documents/upload-url`).
    async fn submit_url(&self, url: &str) -> Result<UploadReceipt, TransportError>;

    /// Query a processing job (`GET /api/documents/status/{job}`).
    async fn fetch_status(&self, job: &JobId) -> Result<StatusReport, TransportError>;
}
