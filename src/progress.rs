//! Observer trait for document lifecycle events.
//!
//! Inject an [`Arc<dyn IngestObserver>`] into
//! [`crate::workflow::UploadWorkflow`] to receive events as documents are
//! uploaded and processed. The CLI uses it to drive progress bars and print
//! one line per finished document; a GUI would raise toasts from
//! [`IngestObserver::on_notification`].
//!
//! # Guarantees
//!
//! * `on_notification` fires **exactly once** per document that reaches a
//!   terminal state (Completed, Failed or Unknown).
//! * Non-terminal transitions only reach `on_status_change`; new detail
//!   text without a status change reaches `on_detail_change`.
//! * For one document, events arrive in lifecycle order. Across documents
//!   they interleave arbitrarily and may come from different threads.
//!
//! # Example
//!
//! ```rust
//! use docingest::{DocumentRecord, IngestObserver, Notification};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct Toasts {
//!     shown: AtomicUsize,
//! }
//!
//! impl IngestObserver for Toasts {
//!     fn on_notification(&self, record: &DocumentRecord, notification: &Notification) {
//!         self.shown.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}: {}", record.name, notification);
//!     }
//! }
//! ```

use crate::model::{DocumentId, DocumentRecord, DocumentStatus};
use std::fmt;
use std::sync::Arc;

/// The single user-facing event emitted when a document reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Processing finished successfully.
    Completed,
    /// The upload was rejected or the server reported a processing failure.
    Failed { reason: String },
    /// Polling gave up without a definitive answer.
    Unknown { reason: String },
}

impl Notification {
    /// Build the notification for a terminal status, `None` otherwise.
    pub fn for_status(status: DocumentStatus, reason: Option<&str>) -> Option<Self> {
        let reason = || reason.unwrap_or("no detail provided").to_string();
        match status {
            DocumentStatus::Completed => Some(Notification::Completed),
            DocumentStatus::Failed => Some(Notification::Failed { reason: reason() }),
            DocumentStatus::Unknown => Some(Notification::Unknown { reason: reason() }),
            DocumentStatus::Uploading | DocumentStatus::Processing => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Notification::Completed)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Completed => f.write_str("processing completed"),
            Notification::Failed { reason } => write!(f, "processing failed: {reason}"),
            Notification::Unknown { reason } => write!(f, "status unknown: {reason}"),
        }
    }
}

/// Called by the workflow as documents move through their lifecycle.
///
/// All methods have default no-op implementations so observers only
/// override what they care about. Implementations must be `Send + Sync`:
/// uploads and pollers run on separate tokio tasks.
pub trait IngestObserver: Send + Sync {
    /// A submission passed validation and its record was created.
    fn on_document_created(&self, record: &DocumentRecord) {
        let _ = record;
    }

    /// Upload progress increased. `percent` is non-decreasing per document.
    fn on_upload_progress(&self, id: DocumentId, percent: u8) {
        let _ = (id, percent);
    }

    /// The document status changed. Fires for every applied transition,
    /// terminal ones included.
    fn on_status_change(&self, record: &DocumentRecord, from: DocumentStatus) {
        let _ = (record, from);
    }

    /// The service sent new detail text (e.g. "chunking") while the status
    /// stayed the same.
    fn on_detail_change(&self, record: &DocumentRecord) {
        let _ = record;
    }

    /// A document reached a terminal state. Fires exactly once per document.
    fn on_notification(&self, record: &DocumentRecord, notification: &Notification) {
        let _ = (record, notification);
    }

    /// A transient, document-scoped error worth surfacing (e.g. the upload
    /// request failed). Always followed by the terminal notification.
    fn on_transient_error(&self, id: DocumentId, message: &str) {
        let _ = (id, message);
    }
}

/// A no-op implementation for callers that only read the registry.
///
/// This is the default when no observer is configured.
pub struct NoopObserver;

impl IngestObserver for NoopObserver {}

/// Convenience alias for the shared observer handle.
pub type ObserverHandle = Arc<dyn IngestObserver>;
