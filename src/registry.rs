//! In-memory document registry: the single source of truth for observers.
//!
//! The registry is append-only for the lifetime of a session. It performs
//! no I/O; all writes come from the upload workflow and the status pollers,
//! which may run on different tasks, so every operation takes the lock once
//! and applies its read-modify-write without interleaving.
//!
//! Mutations are guarded by the lifecycle rules of
//! [`DocumentStatus::can_transition_to`]: a terminal record can no longer
//! change, progress only goes up, and a sealed record (its task was
//! cancelled) ignores every write.
//!
//! Observers that want a live feed call [`DocumentRegistry::subscribe`].
//! Events are published while the lock is held, so for any one document the
//! feed order equals the mutation order.

use crate::model::{DocumentId, DocumentRecord, DocumentStatus, JobId, ServerId, SourceKind};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Capacity of the event feed; slow subscribers see `Lagged` past this.
const EVENT_CAPACITY: usize = 1024;

/// A change applied to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Created(DocumentRecord),
    Progress {
        id: DocumentId,
        percent: u8,
    },
    ServerIdBound {
        id: DocumentId,
        server_id: ServerId,
        job_id: JobId,
    },
    StatusChanged {
        record: DocumentRecord,
        from: DocumentStatus,
    },
    /// The service reported new detail text without a status change.
    DetailChanged {
        id: DocumentId,
        detail: String,
    },
}

impl RegistryEvent {
    pub fn document_id(&self) -> DocumentId {
        match self {
            RegistryEvent::Created(r) => r.id,
            RegistryEvent::Progress { id, .. }
            | RegistryEvent::ServerIdBound { id, .. }
            | RegistryEvent::DetailChanged { id, .. } => *id,
            RegistryEvent::StatusChanged { record, .. } => record.id,
        }
    }
}

/// Outcome of [`DocumentRegistry::set_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The status moved forward; `record` is the updated snapshot.
    Applied {
        from: DocumentStatus,
        record: DocumentRecord,
    },
    /// Same non-terminal status written again with new detail text;
    /// `record` is the updated snapshot.
    DetailChanged { record: DocumentRecord },
    /// Same non-terminal status written again, nothing to store.
    Unchanged,
    /// Unknown id, sealed record, terminal record, or backward move.
    Rejected,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

#[derive(Default)]
struct Inner {
    records: Vec<DocumentRecord>,
    index: HashMap<DocumentId, usize>,
    sealed: HashSet<DocumentId>,
    next_id: u64,
}

impl Inner {
    /// Mutable access to a record that still accepts writes.
    fn writable(&mut self, id: DocumentId) -> Option<&mut DocumentRecord> {
        if self.sealed.contains(&id) {
            return None;
        }
        let idx = *self.index.get(&id)?;
        self.records.get_mut(idx)
    }
}

/// Shared, cloneable handle to the document registry.
#[derive(Clone)]
pub struct DocumentRegistry {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("documents", &self.len())
            .finish()
    }
}

impl DocumentRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    // A panic while holding the lock cannot leave a record half-written:
    // every mutation is a single field assignment.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Insert a new record in `Uploading` state at 0 % and return its id.
    ///
    /// The record is visible to [`list`](Self::list) and subscribers before
    /// this returns, i.e. before any network call is made.
    pub fn create(
        &self,
        source_kind: SourceKind,
        name: impl Into<String>,
        size_bytes: Option<u64>,
        mime_type: Option<String>,
    ) -> DocumentId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = DocumentId(inner.next_id);
        let record = DocumentRecord {
            id,
            server_id: None,
            job_id: None,
            name: name.into(),
            source_kind,
            size_bytes,
            mime_type,
            created_at: Utc::now(),
            status: DocumentStatus::Uploading,
            upload_progress_percent: 0,
            detail: None,
        };
        debug!("Registry: created {} '{}'", id, record.name);
        let idx = inner.records.len();
        inner.records.push(record.clone());
        inner.index.insert(id, idx);
        self.publish(RegistryEvent::Created(record));
        id
    }

    /// Raise the upload progress of an `Uploading` record.
    ///
    /// Stores `max(current, percent)` (clamped to 100). Returns `true` when
    /// the stored value changed; absent, sealed or non-uploading records are
    /// left alone.
    pub fn set_progress(&self, id: DocumentId, percent: u8) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.writable(id) else {
            return false;
        };
        if record.status != DocumentStatus::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= record.upload_progress_percent {
            return false;
        }
        record.upload_progress_percent = percent;
        trace!("Registry: {} upload at {}%", id, percent);
        self.publish(RegistryEvent::Progress { id, percent });
        true
    }

    /// Move a record to `status`, recording `detail` when given.
    ///
    /// Terminal records never change again and backward moves are refused.
    pub fn set_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
        detail: Option<String>,
    ) -> Transition {
        let mut inner = self.lock();
        let Some(record) = inner.writable(id) else {
            return Transition::Rejected;
        };

        let from = record.status;
        if from == status && !from.is_terminal() {
            return match detail {
                Some(detail) if record.detail.as_deref() != Some(detail.as_str()) => {
                    record.detail = Some(detail.clone());
                    let snapshot = record.clone();
                    trace!("Registry: {} detail '{}'", id, detail);
                    self.publish(RegistryEvent::DetailChanged { id, detail });
                    Transition::DetailChanged { record: snapshot }
                }
                _ => Transition::Unchanged,
            };
        }
        if !from.can_transition_to(status) {
            debug!("Registry: {} refused {} → {}", id, from, status);
            return Transition::Rejected;
        }

        record.status = status;
        if detail.is_some() {
            record.detail = detail;
        }
        let snapshot = record.clone();
        debug!("Registry: {} {} → {}", id, from, status);
        self.publish(RegistryEvent::StatusChanged {
            record: snapshot.clone(),
            from,
        });
        Transition::Applied {
            from,
            record: snapshot,
        }
    }

    /// Attach the server-side identifiers. Only the first call has effect.
    pub fn bind_server_id(&self, id: DocumentId, server_id: ServerId, job_id: JobId) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.writable(id) else {
            return false;
        };
        if record.server_id.is_some() {
            return false;
        }
        record.server_id = Some(server_id.clone());
        record.job_id = Some(job_id.clone());
        self.publish(RegistryEvent::ServerIdBound {
            id,
            server_id,
            job_id,
        });
        true
    }

    /// Freeze a record: every later mutation of it is a no-op.
    ///
    /// Used on cancellation so an in-flight task that has not yet observed
    /// its cancellation token still cannot write.
    pub fn seal(&self, id: DocumentId) -> bool {
        let mut inner = self.lock();
        inner.index.contains_key(&id) && inner.sealed.insert(id)
    }

    pub fn is_sealed(&self, id: DocumentId) -> bool {
        self.lock().sealed.contains(&id)
    }

    /// Snapshot of all records in insertion order, most recent last.
    pub fn list(&self) -> Vec<DocumentRecord> {
        self.lock().records.clone()
    }

    pub fn get(&self, id: DocumentId) -> Option<DocumentRecord> {
        let inner = self.lock();
        let idx = *inner.index.get(&id)?;
        inner.records.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any record is still uploading.
    pub fn is_uploading(&self) -> bool {
        self.lock()
            .records
            .iter()
            .any(|r| r.status == DocumentStatus::Uploading)
    }

    /// Subscribe to the live event feed. Only events after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(reg: &DocumentRegistry, name: &str) -> DocumentId {
        reg.create(SourceKind::File, name, Some(2048), Some("application/pdf".into()))
    }

    #[test]
    fn create_starts_uploading_at_zero() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        let r = reg.get(id).unwrap();
        assert_eq!(r.status, DocumentStatus::Uploading);
        assert_eq!(r.upload_progress_percent, 0);
        assert_eq!(r.size_bytes, Some(2048));
        assert!(r.server_id.is_none());
    }

    #[test]
    fn ids_are_unique_and_list_is_insertion_ordered() {
        let reg = DocumentRegistry::new();
        let a = file(&reg, "a.pdf");
        let b = reg.create(SourceKind::Url, "https://x.com/b.pdf", None, None);
        let c = file(&reg, "c.pdf");
        assert!(a != b && b != c && a != c);
        let names: Vec<_> = reg.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a.pdf", "https://x.com/b.pdf", "c.pdf"]);
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        assert!(reg.set_progress(id, 50));
        assert!(!reg.set_progress(id, 25));
        assert_eq!(reg.get(id).unwrap().upload_progress_percent, 50);
        assert!(reg.set_progress(id, 250));
        assert_eq!(reg.get(id).unwrap().upload_progress_percent, 100);
    }

    #[test]
    fn progress_ignored_outside_uploading_and_for_unknown_ids() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        assert!(reg.set_status(id, DocumentStatus::Processing, None).is_applied());
        assert!(!reg.set_progress(id, 80));
        assert_eq!(reg.get(id).unwrap().upload_progress_percent, 0);
        assert!(!reg.set_progress(DocumentId(999), 10));
    }

    #[test]
    fn terminal_status_is_final() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        reg.set_status(id, DocumentStatus::Processing, None);
        assert!(reg.set_status(id, DocumentStatus::Completed, None).is_applied());
        assert_eq!(
            reg.set_status(id, DocumentStatus::Failed, None),
            Transition::Rejected
        );
        assert_eq!(
            reg.set_status(id, DocumentStatus::Processing, None),
            Transition::Rejected
        );
        assert_eq!(reg.get(id).unwrap().status, DocumentStatus::Completed);
    }

    #[test]
    fn backward_and_illegal_moves_are_rejected() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        assert_eq!(
            reg.set_status(id, DocumentStatus::Unknown, None),
            Transition::Rejected
        );
        reg.set_status(id, DocumentStatus::Processing, None);
        assert_eq!(
            reg.set_status(id, DocumentStatus::Uploading, None),
            Transition::Rejected
        );
    }

    #[test]
    fn repeated_processing_updates_detail_only() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        reg.set_status(id, DocumentStatus::Processing, None);
        let t = reg.set_status(id, DocumentStatus::Processing, Some("chunking".into()));
        match t {
            Transition::DetailChanged { record } => {
                assert_eq!(record.detail.as_deref(), Some("chunking"))
            }
            other => panic!("unexpected transition {other:?}"),
        }
        assert_eq!(reg.get(id).unwrap().detail.as_deref(), Some("chunking"));
        assert_eq!(
            reg.set_status(id, DocumentStatus::Processing, Some("chunking".into())),
            Transition::Unchanged
        );
        assert_eq!(reg.get(id).unwrap().status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn detail_changes_are_published_once() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        reg.set_status(id, DocumentStatus::Processing, None);
        let mut rx = reg.subscribe();

        reg.set_status(id, DocumentStatus::Processing, Some("chunking".into()));
        reg.set_status(id, DocumentStatus::Processing, Some("chunking".into())); // same text
        reg.set_status(id, DocumentStatus::Processing, None); // keeps the old detail
        reg.set_status(id, DocumentStatus::Processing, Some("embedding".into()));

        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::DetailChanged {
                id,
                detail: "chunking".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::DetailChanged {
                id,
                detail: "embedding".into()
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(reg.get(id).unwrap().detail.as_deref(), Some("embedding"));
    }

    #[test]
    fn server_id_binds_once() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        assert!(reg.bind_server_id(id, ServerId("42".into()), JobId("j1".into())));
        assert!(!reg.bind_server_id(id, ServerId("43".into()), JobId("j2".into())));
        let r = reg.get(id).unwrap();
        assert_eq!(r.server_id, Some(ServerId("42".into())));
        assert_eq!(r.job_id, Some(JobId("j1".into())));
    }

    #[test]
    fn sealed_records_ignore_writes() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        reg.set_progress(id, 10);
        assert!(reg.seal(id));
        assert!(!reg.seal(id));
        assert!(!reg.set_progress(id, 90));
        assert_eq!(
            reg.set_status(id, DocumentStatus::Failed, None),
            Transition::Rejected
        );
        assert!(!reg.bind_server_id(id, ServerId("1".into()), JobId("1".into())));
        let r = reg.get(id).unwrap();
        assert_eq!(r.upload_progress_percent, 10);
        assert_eq!(r.status, DocumentStatus::Uploading);
        assert!(!reg.seal(DocumentId(77)));
    }

    #[test]
    fn is_uploading_tracks_open_uploads() {
        let reg = DocumentRegistry::new();
        assert!(!reg.is_uploading());
        let id = file(&reg, "a.pdf");
        assert!(reg.is_uploading());
        reg.set_status(id, DocumentStatus::Failed, Some("rejected".into()));
        assert!(!reg.is_uploading());
    }

    #[tokio::test]
    async fn subscribers_see_events_in_mutation_order() {
        let reg = DocumentRegistry::new();
        let mut rx = reg.subscribe();
        let id = file(&reg, "a.pdf");
        reg.set_progress(id, 40);
        reg.set_progress(id, 30); // no event
        reg.set_progress(id, 100);
        reg.set_status(id, DocumentStatus::Processing, None);

        assert!(matches!(rx.recv().await.unwrap(), RegistryEvent::Created(_)));
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::Progress { id, percent: 40 }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::Progress { id, percent: 100 }
        );
        match rx.recv().await.unwrap() {
            RegistryEvent::StatusChanged { record, from } => {
                assert_eq!(from, DocumentStatus::Uploading);
                assert_eq!(record.status, DocumentStatus::Processing);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn concurrent_writers_keep_progress_monotonic() {
        let reg = DocumentRegistry::new();
        let id = file(&reg, "a.pdf");
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for p in (t..=100).step_by(8) {
                        reg.set_progress(id, p);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.get(id).unwrap().upload_progress_percent, 100);
    }
}
