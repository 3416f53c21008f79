//! # docingest
//!
//! Client-side document ingestion: upload PDF/DOCX files or submit URLs to a
//! document-processing service, then track each document until the service
//! reports it processed.
//!
//! ## Workflow Overview
//!
//! ```text
//! file / URL
//!  │
//!  ├─ 1. Validate  session gate, MIME allow-list, size limit, URL scheme
//!  ├─ 2. Register  record created at once: Uploading, 0 %
//!  ├─ 3. Upload    streamed multipart POST, byte-level progress
//!  ├─ 4. Bind      server document id + processing job id, Processing
//!  ├─ 5. Poll      3 s initial delay, then every 5 s, bounded retries
//!  └─ 6. Notify    Completed | Failed | Unknown, exactly once per document
//! ```
//!
//! Every submission runs on its own tokio task with its own cancellation
//! token; several uploads proceed concurrently and each is tracked
//! independently in the shared [`DocumentRegistry`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docingest::{HttpTransport, IngestConfig, UploadWorkflow};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::from_env()?.build()?;
//!     let transport = Arc::new(HttpTransport::new(&config)?);
//!     let workflow = UploadWorkflow::builder(config, transport).build();
//!
//!     let id = workflow.submit_path("report.pdf").await?;
//!     workflow.wait_idle().await;
//!
//!     let record = workflow.registry().get(id).expect("record exists");
//!     println!("{} is {}", record.name, record.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod poller;
pub mod progress;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod validate;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{AlwaysAuthorized, HttpSession, SessionGate, SessionUser};
pub use config::{IngestConfig, IngestConfigBuilder, MIME_DOCX, MIME_PDF};
pub use error::{AuthError, IngestError, TransportError, ValidationError};
pub use ingest::{ingest, IngestReport, IngestStats, RejectedInput};
pub use model::{
    DocumentId, DocumentRecord, DocumentStatus, JobId, RemoteStatus, ServerId, SourceKind,
    StatusReport, UploadProgress, UploadReceipt,
};
pub use poller::PollOutcome;
pub use progress::{IngestObserver, NoopObserver, Notification, ObserverHandle};
pub use registry::{DocumentRegistry, RegistryEvent, Transition};
pub use stream::{event_stream, watch_document, EventStream};
pub use transport::{HttpTransport, NoopProgressSink, Transport, UploadProgressSink};
pub use validate::FileUpload;
pub use workflow::{UploadWorkflow, UploadWorkflowBuilder};
