//! Upload workflow engine.
//!
//! Orchestrates one submission from validation to a terminal state:
//!
//! ```text
//! submit_* ─▶ validate ─▶ registry.create (Uploading, 0 %)
//!                              │  spawned task
//!                              ▼
//!                      transport upload ── progress ──▶ registry.set_progress
//!                        │ ok                      │ err
//!                        ▼                         ▼
//!        bind_server_id, Processing          Failed (+ notification)
//!                        │
//!                        ▼
//!                  status poller ──▶ Completed | Failed | Unknown (+ notification)
//! ```
//!
//! Submissions are independent: each gets its own record, task and
//! cancellation token, and there is no global upload lock. Tokens are kept
//! in a map keyed by [`DocumentId`] so [`UploadWorkflow::cancel`] and
//! [`UploadWorkflow::shutdown`] stop exactly the right tasks.
//!
//! Construct one workflow per session and call `shutdown` on logout.

use crate::auth::{AlwaysAuthorized, SessionGate};
use crate::config::IngestConfig;
use crate::error::{IngestError, TransportError, ValidationError};
use crate::model::{DocumentId, DocumentStatus, SourceKind, UploadProgress, UploadReceipt};
use crate::poller::poll_until_terminal;
use crate::progress::{IngestObserver, Notification, NoopObserver, ObserverHandle};
use crate::registry::{DocumentRegistry, Transition};
use crate::transport::{Transport, UploadProgressSink};
use crate::validate::{self, FileUpload};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// State shared by the workflow handle and every task it spawns.
pub(crate) struct Shared {
    pub(crate) config: IngestConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: DocumentRegistry,
    pub(crate) observer: ObserverHandle,
    pub(crate) gate: Arc<dyn SessionGate>,
    pub(crate) poll_limiter: Semaphore,
    tasks: Mutex<HashMap<DocumentId, CancellationToken>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<DocumentId, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write a status and fan the change out to the observer.
    ///
    /// The registry refuses writes to terminal records, so the terminal
    /// notification can only be sent once per document.
    pub(crate) fn apply_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
        detail: Option<String>,
    ) -> Transition {
        let transition = self.registry.set_status(id, status, detail);
        match transition {
            Transition::Applied { from, ref record } => {
                self.observer.on_status_change(record, from);
                if let Some(notification) =
                    Notification::for_status(record.status, record.detail.as_deref())
                {
                    info!("{} '{}': {}", id, record.name, notification);
                    self.observer.on_notification(record, &notification);
                }
            }
            Transition::DetailChanged { ref record } => self.observer.on_detail_change(record),
            Transition::Unchanged | Transition::Rejected => {}
        }
        transition
    }

    fn record_progress(&self, id: DocumentId, percent: u8) {
        if self.registry.set_progress(id, percent) {
            self.observer.on_upload_progress(id, percent);
        }
    }

    /// Common tail of file and URL uploads.
    async fn finish_upload(
        &self,
        id: DocumentId,
        result: Result<UploadReceipt, TransportError>,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }
        match result {
            Ok(receipt) => {
                // Progress must read 100 before the record leaves Uploading.
                self.record_progress(id, 100);
                self.registry
                    .bind_server_id(id, receipt.server_id.clone(), receipt.job_id.clone());
                if !self
                    .apply_status(id, DocumentStatus::Processing, None)
                    .is_applied()
                {
                    return;
                }
                info!(
                    "{}: uploaded as document {} (job {})",
                    id, receipt.server_id, receipt.job_id
                );
                let outcome = poll_until_terminal(self, id, receipt.job_id, token).await;
                debug!("{}: poller finished with {:?}", id, outcome);
            }
            Err(e) => {
                warn!("{}: upload failed: {}", id, e);
                if !self.registry.is_sealed(id) {
                    self.observer
                        .on_transient_error(id, &format!("Upload failed: {e}"));
                }
                self.apply_status(id, DocumentStatus::Failed, Some(e.to_string()));
            }
        }
    }
}

/// Progress sink that feeds one document's registry record.
struct RecordProgress<'a> {
    shared: &'a Shared,
    id: DocumentId,
    token: &'a CancellationToken,
}

impl UploadProgressSink for RecordProgress<'_> {
    fn on_progress(&self, progress: UploadProgress) {
        if self.token.is_cancelled() {
            return;
        }
        self.shared.record_progress(self.id, progress.percent());
    }
}

/// Builder for [`UploadWorkflow`].
pub struct UploadWorkflowBuilder {
    config: IngestConfig,
    transport: Arc<dyn Transport>,
    registry: Option<DocumentRegistry>,
    observer: Option<ObserverHandle>,
    gate: Option<Arc<dyn SessionGate>>,
}

impl UploadWorkflowBuilder {
    /// Share an existing registry (e.g. one a UI already renders).
    pub fn registry(mut self, registry: DocumentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Gate consulted before each submission. Default: [`AlwaysAuthorized`].
    pub fn gate(mut self, gate: Arc<dyn SessionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> UploadWorkflow {
        let permits = self
            .config
            .max_concurrent_polls
            .clamp(1, Semaphore::MAX_PERMITS);
        UploadWorkflow {
            shared: Arc::new(Shared {
                config: self.config,
                transport: self.transport,
                registry: self.registry.unwrap_or_default(),
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
                gate: self.gate.unwrap_or_else(|| Arc::new(AlwaysAuthorized)),
                poll_limiter: Semaphore::new(permits),
                tasks: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }
}

/// Handle to an ingestion session. Cheap to clone.
#[derive(Clone)]
pub struct UploadWorkflow {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for UploadWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadWorkflow")
            .field("config", &self.shared.config)
            .field("registry", &self.shared.registry)
            .field("active", &self.active_count())
            .finish()
    }
}

impl UploadWorkflow {
    pub fn builder(config: IngestConfig, transport: Arc<dyn Transport>) -> UploadWorkflowBuilder {
        UploadWorkflowBuilder {
            config,
            transport,
            registry: None,
            observer: None,
            gate: None,
        }
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &IngestConfig {
        &self.shared.config
    }

    /// Documents whose upload or poller task is still running.
    pub fn active_count(&self) -> usize {
        self.shared.tasks().len()
    }

    fn ensure_open(&self) -> Result<(), IngestError> {
        if self.shared.root.is_cancelled() {
            return Err(IngestError::ShutDown);
        }
        if !self.shared.gate.is_authorized() {
            return Err(IngestError::Unauthorized);
        }
        Ok(())
    }

    /// Register the cancellation token of a freshly created record.
    ///
    /// The shutdown check and the insert happen under the task-map lock that
    /// [`shutdown`](Self::shutdown) also holds, so a record created while the
    /// session shuts down is either drained by it or sealed here.
    fn track(&self, id: DocumentId) -> CancellationToken {
        let token = self.shared.root.child_token();
        {
            let mut tasks = self.shared.tasks();
            if self.shared.root.is_cancelled() {
                drop(tasks);
                self.shared.registry.seal(id);
                debug!("{}: session shut down before the upload started", id);
            } else {
                tasks.insert(id, token.clone());
            }
        }
        if let Some(record) = self.shared.registry.get(id) {
            self.shared.observer.on_document_created(&record);
        }
        token
    }

    /// Validate and upload an in-memory file.
    ///
    /// Returns as soon as the record exists; the upload and the status
    /// polling continue on a background task. Must be called from within a
    /// tokio runtime.
    pub async fn submit_file(&self, upload: FileUpload) -> Result<DocumentId, IngestError> {
        self.ensure_open()?;
        validate::validate_file(&upload, &self.shared.config)?;

        let id = self.shared.registry.create(
            SourceKind::File,
            upload.name.clone(),
            Some(upload.size_bytes()),
            Some(upload.mime_type.clone()),
        );
        info!("{}: submitted file '{}' ({} bytes)", id, upload.name, upload.size_bytes());
        let token = self.track(id);

        let shared = Arc::clone(&self.shared);
        self.shared.tracker.spawn(async move {
            let result = {
                let sink = RecordProgress {
                    shared: &shared,
                    id,
                    token: &token,
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    r = shared.transport.submit_file(&upload, &sink) => Some(r),
                }
            };
            if let Some(result) = result {
                shared.finish_upload(id, result, &token).await;
            }
            shared.tasks().remove(&id);
        });
        Ok(id)
    }

    /// Read a local file, infer its MIME type from the extension, and upload it.
    ///
    /// The size limit is checked before the file is read.
    pub async fn submit_path(&self, path: impl AsRef<Path>) -> Result<DocumentId, IngestError> {
        self.ensure_open()?;
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(ValidationError::MissingFileName)?
            .to_string();

        let io_err = |source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        validate::check_size(&name, meta.len(), &self.shared.config)?;
        let bytes = tokio::fs::read(path).await.map_err(io_err)?;

        let mime = validate::mime_from_path(path);
        self.submit_file(FileUpload::new(name, mime, bytes)).await
    }

    /// Validate and submit a URL for server-side fetching.
    pub async fn submit_url(&self, url: &str) -> Result<DocumentId, IngestError> {
        self.ensure_open()?;
        let url = validate::validate_url(url)?;

        let id = self
            .shared
            .registry
            .create(SourceKind::Url, url.clone(), None, None);
        info!("{}: submitted URL {}", id, url);
        let token = self.track(id);

        let shared = Arc::clone(&self.shared);
        self.shared.tracker.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                r = shared.transport.submit_url(&url) => Some(r),
            };
            if let Some(result) = result {
                shared.finish_upload(id, result, &token).await;
            }
            shared.tasks().remove(&id);
        });
        Ok(id)
    }

    /// Stop a document's upload or poller. Returns `false` if nothing was running.
    ///
    /// The record is sealed first, so it keeps whatever state it had and no
    /// further write can land after this returns.
    pub fn cancel(&self, id: DocumentId) -> bool {
        let Some(token) = self.shared.tasks().remove(&id) else {
            return false;
        };
        self.shared.registry.seal(id);
        token.cancel();
        info!("{}: cancelled", id);
        true
    }

    /// Cancel every running task and refuse new submissions.
    pub fn shutdown(&self) {
        let ids: Vec<DocumentId> = {
            let mut tasks = self.shared.tasks();
            for id in tasks.keys() {
                self.shared.registry.seal(*id);
            }
            self.shared.root.cancel();
            tasks.drain().map(|(id, _)| id).collect()
        };
        self.shared.tracker.close();
        if !ids.is_empty() {
            info!("Shutdown: cancelled {} running document task(s)", ids.len());
        }
    }

    /// Wait until no upload or poller task is running.
    pub async fn wait_idle(&self) {
        let tracker = &self.shared.tracker;
        tracker.close();
        tracker.wait().await;
        if !self.shared.root.is_cancelled() {
            tracker.reopen();
        }
    }
}
