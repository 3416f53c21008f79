//! Workflow and poller behaviour against a scripted in-process service.
//!
//! Every test runs on a paused tokio clock, so the 3 s / 5 s polling
//! schedule is checked exactly and the suite still finishes instantly.

use async_trait::async_trait;
use docingest::{
    ingest, DocumentId, DocumentRecord, DocumentStatus, FileUpload, IngestConfig, IngestError,
    IngestObserver, JobId, Notification, RemoteStatus, ServerId, SessionGate, StatusReport,
    Transport, TransportError, UploadProgress, UploadProgressSink, UploadReceipt, UploadWorkflow,
    ValidationError, MIME_DOCX, MIME_PDF,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};

// ── Scripted service ─────────────────────────────────────────────────────────

const DEFAULT_UPLOAD_TIME: Duration = Duration::from_millis(400);

type Reply = Result<StatusReport, TransportError>;

fn reply(status: RemoteStatus, detail: Option<&str>) -> Reply {
    Ok(StatusReport {
        status,
        detail: detail.map(str::to_string),
    })
}

fn processing() -> Reply {
    reply(RemoteStatus::Processing, None)
}

fn completed() -> Reply {
    reply(RemoteStatus::Completed, None)
}

fn network_down() -> Reply {
    Err(TransportError::NetworkFailure("connection refused".into()))
}

/// Fake ingestion service. Job ids are `job-<name>`; server ids count up
/// from 42. Each job answers from its reply queue, repeating the last reply
/// once the queue is down to one entry.
struct ScriptedTransport {
    next_server_id: AtomicU64,
    upload_times: Mutex<HashMap<String, Duration>>,
    upload_error: Mutex<Option<TransportError>>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    status_latency: Duration,
    uploads: AtomicUsize,
    uploaded_at: Mutex<HashMap<String, Instant>>,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    fn with_latency(status_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            next_server_id: AtomicU64::new(42),
            upload_times: Mutex::new(HashMap::new()),
            upload_error: Mutex::new(None),
            replies: Mutex::new(HashMap::new()),
            status_latency,
            uploads: AtomicUsize::new(0),
            uploaded_at: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn script(&self, name: &str, replies: Vec<Reply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(format!("job-{name}"), replies.into());
    }

    fn upload_time(&self, name: &str, time: Duration) {
        self.upload_times.lock().unwrap().insert(name.to_string(), time);
    }

    fn fail_uploads(&self, error: TransportError) {
        *self.upload_error.lock().unwrap() = Some(error);
    }

    fn calls_for(&self, name: &str) -> Vec<Instant> {
        let job = format!("job-{name}");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(j, _)| *j == job)
            .map(|(_, at)| *at)
            .collect()
    }

    fn uploaded_at(&self, name: &str) -> Instant {
        self.uploaded_at.lock().unwrap()[name]
    }

    async fn accept(&self, name: &str) -> Result<UploadReceipt, TransportError> {
        if let Some(e) = self.upload_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.uploaded_at
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
        let id = self.next_server_id.fetch_add(1, Ordering::SeqCst);
        Ok(UploadReceipt {
            server_id: ServerId(id.to_string()),
            job_id: JobId(format!("job-{name}")),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit_file(
        &self,
        upload: &FileUpload,
        sink: &dyn UploadProgressSink,
    ) -> Result<UploadReceipt, TransportError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let total = upload.size_bytes();
        let time = self
            .upload_times
            .lock()
            .unwrap()
            .get(&upload.name)
            .copied()
            .unwrap_or(DEFAULT_UPLOAD_TIME);

        sink.on_progress(UploadProgress {
            bytes_sent: 0,
            bytes_total: total,
        });
        for sent in [total / 4, total / 2, total] {
            sleep(time / 3).await;
            sink.on_progress(UploadProgress {
                bytes_sent: sent,
                bytes_total: total,
            });
        }
        self.accept(&upload.name).await
    }

    async fn submit_url(&self, url: &str) -> Result<UploadReceipt, TransportError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        sleep(DEFAULT_UPLOAD_TIME).await;
        self.accept(url).await
    }

    async fn fetch_status(&self, job: &JobId) -> Result<StatusReport, TransportError> {
        self.calls.lock().unwrap().push((job.0.clone(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        sleep(self.status_latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&job.0) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(processing),
            Some(queue) => queue.front().cloned().unwrap_or_else(processing),
            None => processing(),
        }
    }
}

// ── Recording observer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Created(DocumentId),
    Progress(DocumentId, u8),
    Status(DocumentId, DocumentStatus),
    Notified(DocumentId, Notification),
    Detail(DocumentId, String),
    Transient(DocumentId),
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn notifications(&self, id: DocumentId) -> Vec<Notification> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Notified(i, n) if i == id => Some(n),
                _ => None,
            })
            .collect()
    }

    fn progress(&self, id: DocumentId) -> Vec<u8> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Progress(i, p) if i == id => Some(p),
                _ => None,
            })
            .collect()
    }

    fn details(&self, id: DocumentId) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Detail(i, d) if i == id => Some(d),
                _ => None,
            })
            .collect()
    }

    fn position(&self, wanted: &Seen) -> Option<usize> {
        self.seen().iter().position(|s| s == wanted)
    }
}

impl IngestObserver for Recorder {
    fn on_document_created(&self, record: &DocumentRecord) {
        self.seen.lock().unwrap().push(Seen::Created(record.id));
    }

    fn on_upload_progress(&self, id: DocumentId, percent: u8) {
        self.seen.lock().unwrap().push(Seen::Progress(id, percent));
    }

    fn on_status_change(&self, record: &DocumentRecord, _from: DocumentStatus) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Status(record.id, record.status));
    }

    fn on_notification(&self, record: &DocumentRecord, notification: &Notification) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Notified(record.id, notification.clone()));
    }

    fn on_detail_change(&self, record: &DocumentRecord) {
        let detail = record.detail.clone().unwrap_or_default();
        self.seen.lock().unwrap().push(Seen::Detail(record.id, detail));
    }

    fn on_transient_error(&self, id: DocumentId, _message: &str) {
        self.seen.lock().unwrap().push(Seen::Transient(id));
    }
}

struct LoggedOut;

impl SessionGate for LoggedOut {
    fn is_authorized(&self) -> bool {
        false
    }
}

/// Gate that shuts the session down while a submission is being checked,
/// i.e. after the shutdown check and before the record is created.
#[derive(Default)]
struct ShutdownDuringSubmit {
    workflow: OnceLock<UploadWorkflow>,
}

impl SessionGate for ShutdownDuringSubmit {
    fn is_authorized(&self) -> bool {
        if let Some(workflow) = self.workflow.get() {
            workflow.shutdown();
        }
        true
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn setup(
    config: IngestConfig,
    transport: Arc<ScriptedTransport>,
) -> (UploadWorkflow, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let workflow = UploadWorkflow::builder(config, transport)
        .observer(recorder.clone())
        .build();
    (workflow, recorder)
}

fn defaults() -> IngestConfig {
    IngestConfig::builder().build().unwrap()
}

fn pdf(name: &str, len: usize) -> FileUpload {
    FileUpload::new(name, MIME_PDF, vec![b'%'; len])
}

fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(10),
        "expected ~{expected:?}, got {actual:?}"
    );
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pdf_upload_reports_progress_then_polls_to_completion() {
    let transport = ScriptedTransport::new();
    transport.script("report.pdf", vec![processing(), completed()]);
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("report.pdf", 2048)).await.unwrap();

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Uploading);
    assert_eq!(record.upload_progress_percent, 0);
    assert_eq!(record.size_bytes, Some(2048));

    workflow.wait_idle().await;

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Completed);
    assert_eq!(record.server_id, Some(ServerId("42".into())));
    assert_eq!(record.job_id, Some(JobId("job-report.pdf".into())));
    assert_eq!(record.upload_progress_percent, 100);

    assert_eq!(recorder.progress(id), vec![25, 50, 100]);
    assert_eq!(recorder.notifications(id), vec![Notification::Completed]);

    let progress_done = recorder.position(&Seen::Progress(id, 100)).unwrap();
    let processing_at = recorder
        .position(&Seen::Status(id, DocumentStatus::Processing))
        .unwrap();
    assert!(progress_done < processing_at);

    let calls = transport.calls_for("report.pdf");
    assert_eq!(calls.len(), 2);
    assert_near(calls[0] - transport.uploaded_at("report.pdf"), Duration::from_secs(3));
    assert_near(calls[1] - calls[0], Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn poll_interval_starts_when_the_response_arrives() {
    let transport = ScriptedTransport::with_latency(Duration::from_secs(2));
    transport.script("slow.pdf", vec![processing(), completed()]);
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("slow.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    let calls = transport.calls_for("slow.pdf");
    assert_eq!(calls.len(), 2);
    // 2 s waiting for the answer, then the 5 s interval.
    assert_near(calls[1] - calls[0], Duration::from_secs(7));
    assert_eq!(recorder.notifications(id), vec![Notification::Completed]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_status_request_times_out_and_counts_as_failure() {
    let transport = ScriptedTransport::with_latency(Duration::from_secs(60));
    let config = IngestConfig::builder().max_poll_failures(2).build().unwrap();
    let (workflow, recorder) = setup(config, transport.clone());

    let id = workflow.submit_file(pdf("hang.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    let calls = transport.calls_for("hang.pdf");
    assert_eq!(calls.len(), 2);
    // 15 s poll timeout, then 1 s of backoff.
    assert_near(calls[1] - calls[0], Duration::from_secs(16));

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Unknown);
    let detail = record.detail.unwrap();
    assert!(detail.contains("timed out"), "detail was {detail:?}");

    let notifications = recorder.notifications(id);
    assert_eq!(notifications.len(), 1);
    assert!(matches!(notifications[0], Notification::Unknown { .. }));
}

#[tokio::test(start_paused = true)]
async fn processing_detail_updates_reach_the_observer() {
    let transport = ScriptedTransport::new();
    transport.script(
        "d.pdf",
        vec![
            reply(RemoteStatus::Processing, Some("chunking")),
            reply(RemoteStatus::Processing, Some("chunking")),
            reply(RemoteStatus::Processing, Some("embedding")),
            completed(),
        ],
    );
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("d.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    assert_eq!(transport.calls_for("d.pdf").len(), 4);
    assert_eq!(recorder.details(id), vec!["chunking", "embedding"]);
    assert_eq!(recorder.notifications(id), vec![Notification::Completed]);
}

#[tokio::test(start_paused = true)]
async fn url_submission_ends_failed_with_server_reason() {
    let url = "https://example.com/a.pdf";
    let transport = ScriptedTransport::new();
    transport.script(url, vec![reply(RemoteStatus::Failed, Some("corrupt"))]);
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_url(url).await.unwrap();
    workflow.wait_idle().await;

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert_eq!(record.name, url);
    assert_eq!(record.size_bytes, None);
    assert_eq!(
        recorder.notifications(id),
        vec![Notification::Failed {
            reason: "corrupt".into()
        }]
    );
    assert_eq!(transport.calls_for(url).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn other_remote_statuses_keep_polling() {
    let transport = ScriptedTransport::new();
    transport.script(
        "q.pdf",
        vec![
            reply(RemoteStatus::Other("queued".into()), None),
            reply(RemoteStatus::Processing, Some("chunking")),
            completed(),
        ],
    );
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("q.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    assert_eq!(transport.calls_for("q.pdf").len(), 3);
    assert_eq!(
        workflow.registry().get(id).unwrap().status,
        DocumentStatus::Completed
    );
    assert_eq!(recorder.notifications(id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn network_errors_end_unknown_after_max_failures() {
    let transport = ScriptedTransport::new();
    transport.script("down.pdf", vec![network_down()]);
    let config = IngestConfig::builder().max_poll_failures(3).build().unwrap();
    let (workflow, recorder) = setup(config, transport.clone());

    let id = workflow.submit_file(pdf("down.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Unknown);
    let notifications = recorder.notifications(id);
    assert_eq!(notifications.len(), 1);
    assert!(matches!(notifications[0], Notification::Unknown { .. }));

    let calls = transport.calls_for("down.pdf");
    assert_eq!(calls.len(), 3);
    // 1 s, then 2 s of backoff.
    assert_near(calls[1] - calls[0], Duration::from_secs(1));
    assert_near(calls[2] - calls[1], Duration::from_secs(2));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.calls_for("down.pdf").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn single_failure_budget_gives_up_on_first_error() {
    let transport = ScriptedTransport::new();
    transport.script("once.pdf", vec![network_down()]);
    let config = IngestConfig::builder().max_poll_failures(1).build().unwrap();
    let (workflow, recorder) = setup(config, transport.clone());

    let id = workflow.submit_file(pdf("once.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    let calls = transport.calls_for("once.pdf");
    assert_eq!(calls.len(), 1);
    assert_near(calls[0] - transport.uploaded_at("once.pdf"), Duration::from_secs(3));
    assert_eq!(
        workflow.registry().get(id).unwrap().status,
        DocumentStatus::Unknown
    );
    assert_eq!(recorder.notifications(id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_job_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.script(
        "gone.pdf",
        vec![Err(TransportError::ServerRejected { status: 404 })],
    );
    let (workflow, _recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("gone.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    assert_eq!(transport.calls_for("gone.pdf").len(), 1);
    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Unknown);
    assert!(record.detail.unwrap().contains("404"));
}

#[tokio::test(start_paused = true)]
async fn transient_poll_error_recovers() {
    let transport = ScriptedTransport::new();
    transport.script("blip.pdf", vec![network_down(), processing(), completed()]);
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("blip.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    assert_eq!(transport.calls_for("blip.pdf").len(), 3);
    assert_eq!(recorder.notifications(id), vec![Notification::Completed]);
}

#[tokio::test(start_paused = true)]
async fn upload_failure_marks_failed_without_polling() {
    let transport = ScriptedTransport::new();
    transport.fail_uploads(TransportError::ServerRejected { status: 500 });
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("bad.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert!(record.server_id.is_none());
    assert!(record.detail.unwrap().contains("500"));
    assert_eq!(recorder.notifications(id).len(), 1);
    assert!(recorder.position(&Seen::Transient(id)).is_some());
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_uploads_are_tracked_independently() {
    let transport = ScriptedTransport::new();
    // Progress ticks every 300 ms for a.pdf and every 250 ms for b.docx.
    transport.upload_time("a.pdf", Duration::from_millis(900));
    transport.upload_time("b.docx", Duration::from_millis(750));
    transport.script("a.pdf", vec![processing(), completed()]);
    transport.script("b.docx", vec![completed()]);
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let a = workflow.submit_file(pdf("a.pdf", 4000)).await.unwrap();
    let b = workflow
        .submit_file(FileUpload::new("b.docx", MIME_DOCX, vec![b'P'; 4000]))
        .await
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(workflow.registry().len(), 2);

    workflow.wait_idle().await;

    for id in [a, b] {
        let progress = recorder.progress(id);
        assert!(
            progress.windows(2).all(|w| w[0] <= w[1]),
            "progress of {id} went backwards: {progress:?}"
        );
        assert_eq!(progress.last(), Some(&100));
    }

    let order: Vec<DocumentId> = recorder
        .seen()
        .into_iter()
        .filter_map(|s| match s {
            Seen::Progress(id, _) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![b, a, b, a, b, a]);

    let b_processing = recorder
        .position(&Seen::Status(b, DocumentStatus::Processing))
        .unwrap();
    let a_processing = recorder
        .position(&Seen::Status(a, DocumentStatus::Processing))
        .unwrap();
    assert!(b_processing < a_processing);

    for id in [a, b] {
        assert_eq!(
            workflow.registry().get(id).unwrap().status,
            DocumentStatus::Completed
        );
        assert_eq!(recorder.notifications(id), vec![Notification::Completed]);
    }
    let b_record = workflow.registry().get(b).unwrap();
    assert_eq!(b_record.mime_type.as_deref(), Some(MIME_DOCX));
    let names: Vec<_> = workflow.registry().list().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["a.pdf", "b.docx"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_poller_and_freezes_record() {
    let transport = ScriptedTransport::new();
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("slow.pdf", 100)).await.unwrap();
    sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.calls_for("slow.pdf").len(), 1);

    assert!(workflow.cancel(id));
    assert!(!workflow.cancel(id));
    workflow.wait_idle().await;
    sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.calls_for("slow.pdf").len(), 1);
    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Processing);
    assert!(workflow.registry().is_sealed(id));
    assert!(recorder.notifications(id).is_empty());
    assert_eq!(workflow.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_upload_leaves_record_uploading() {
    let transport = ScriptedTransport::new();
    transport.upload_time("big.pdf", Duration::from_secs(30));
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let id = workflow.submit_file(pdf("big.pdf", 1000)).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(workflow.cancel(id));
    workflow.wait_idle().await;

    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Uploading);
    assert!(record.server_id.is_none());
    assert!(recorder.notifications(id).is_empty());
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything_and_refuses_new_work() {
    let transport = ScriptedTransport::new();
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let a = workflow.submit_file(pdf("a.pdf", 100)).await.unwrap();
    let b = workflow.submit_url("https://example.com/b.pdf").await.unwrap();
    sleep(Duration::from_secs(10)).await;

    workflow.shutdown();
    workflow.wait_idle().await;
    let calls = transport.calls.lock().unwrap().len();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.calls.lock().unwrap().len(), calls);

    for id in [a, b] {
        assert!(workflow.registry().is_sealed(id));
        assert!(recorder.notifications(id).is_empty());
    }
    let err = workflow.submit_file(pdf("c.pdf", 100)).await.unwrap_err();
    assert!(matches!(err, IngestError::ShutDown));
    assert_eq!(workflow.registry().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_submitting_seals_the_new_record() {
    let transport = ScriptedTransport::new();
    let recorder = Arc::new(Recorder::default());
    let gate = Arc::new(ShutdownDuringSubmit::default());
    let workflow = UploadWorkflow::builder(defaults(), transport.clone())
        .observer(recorder.clone())
        .gate(gate.clone())
        .build();
    assert!(gate.workflow.set(workflow.clone()).is_ok());

    let id = workflow.submit_file(pdf("late.pdf", 100)).await.unwrap();
    workflow.wait_idle().await;
    sleep(Duration::from_secs(60)).await;

    assert!(workflow.registry().is_sealed(id));
    let record = workflow.registry().get(id).unwrap();
    assert_eq!(record.status, DocumentStatus::Uploading);
    assert!(recorder.notifications(id).is_empty());
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(workflow.active_count(), 0);

    let err = workflow.submit_file(pdf("later.pdf", 100)).await.unwrap_err();
    assert!(matches!(err, IngestError::ShutDown));
}

#[tokio::test(start_paused = true)]
async fn oversized_file_is_rejected_before_anything_happens() {
    let transport = ScriptedTransport::new();
    let (workflow, recorder) = setup(defaults(), transport.clone());

    let err = workflow
        .submit_file(pdf("huge.pdf", 15 * 1024 * 1024))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::FileTooLarge { .. })
    ));
    assert!(workflow.registry().is_empty());
    assert!(recorder.seen().is_empty());
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_inputs_are_rejected() {
    let transport = ScriptedTransport::new();
    let (workflow, _recorder) = setup(defaults(), transport.clone());

    let err = workflow
        .submit_file(FileUpload::new("notes.txt", "text/plain", vec![1, 2, 3]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::UnsupportedMimeType { .. })
    ));

    let err = workflow.submit_url("   ").await.unwrap_err();
    assert!(matches!(err, IngestError::Validation(ValidationError::EmptyUrl)));

    let err = workflow.submit_url("ftp://example.com/a.pdf").await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::UnsupportedScheme { .. })
    ));

    assert!(workflow.registry().is_empty());
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_session_cannot_submit() {
    let transport = ScriptedTransport::new();
    let workflow = UploadWorkflow::builder(defaults(), transport.clone())
        .gate(Arc::new(LoggedOut))
        .build();

    let err = workflow.submit_file(pdf("a.pdf", 10)).await.unwrap_err();
    assert!(matches!(err, IngestError::Unauthorized));
    let err = workflow.submit_url("https://example.com/a.pdf").await.unwrap_err();
    assert!(matches!(err, IngestError::Unauthorized));
    assert!(workflow.registry().is_empty());
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn status_requests_respect_the_concurrency_cap() {
    let transport = ScriptedTransport::with_latency(Duration::from_secs(1));
    let config = IngestConfig::builder().max_concurrent_polls(2).build().unwrap();
    let (workflow, recorder) = setup(config, transport.clone());

    let mut ids = Vec::new();
    for i in 0..5 {
        let name = format!("doc{i}.pdf");
        transport.script(&name, vec![processing(), completed()]);
        ids.push(workflow.submit_file(pdf(&name, 100)).await.unwrap());
    }
    workflow.wait_idle().await;

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 2);
    for id in ids {
        assert_eq!(recorder.notifications(id), vec![Notification::Completed]);
    }
}

#[tokio::test(start_paused = true)]
async fn batch_ingest_reports_documents_and_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.pdf");
    let notes_path = dir.path().join("notes.txt");
    std::fs::write(&report_path, b"%PDF-1.7 minimal").unwrap();
    std::fs::write(&notes_path, b"plain text").unwrap();

    let transport = ScriptedTransport::new();
    transport.script("report.pdf", vec![completed()]);
    let (workflow, _recorder) = setup(defaults(), transport.clone());

    let inputs = [
        report_path.to_str().unwrap().to_string(),
        notes_path.to_str().unwrap().to_string(),
        dir.path().join("missing.pdf").to_str().unwrap().to_string(),
    ];
    let report = ingest(&inputs, &workflow).await.unwrap();

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].name, "report.pdf");
    assert_eq!(report.documents[0].mime_type.as_deref(), Some(MIME_PDF));
    assert_eq!(report.documents[0].status, DocumentStatus::Completed);
    assert_eq!(report.rejected.len(), 2);
    assert!(matches!(
        report.rejected[1].error,
        IngestError::Io { .. }
    ));
    assert_eq!(report.stats.completed, 1);
    assert_eq!(report.stats.rejected, 2);
    assert!(!report.all_completed());
}
