//! One-shot batch ingestion: submit everything, wait, report.
//!
//! ## Why a batch entry point?
//!
//! The workflow is fire-and-observe: `submit_*` returns as soon as the
//! record exists. Scripts and the CLI want the opposite: hand over a list of
//! paths and URLs, block until every document is terminal, then inspect one
//! summary. [`ingest`] does exactly that on top of an [`UploadWorkflow`], so
//! observers attached to the workflow keep receiving live events.

use crate::error::IngestError;
use crate::model::{DocumentId, DocumentRecord, DocumentStatus};
use crate::validate;
use crate::workflow::UploadWorkflow;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// An input that never became a document.
#[derive(Debug)]
pub struct RejectedInput {
    /// The path or URL as given.
    pub input: String,
    pub error: IngestError,
}

/// Counters for one [`ingest`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub submitted: usize,
    pub rejected: usize,
    pub completed: usize,
    pub failed: usize,
    pub unknown: usize,
    /// Documents still non-terminal at the end (cancelled mid-flight).
    pub unfinished: usize,
    pub elapsed_ms: u64,
}

/// Outcome of an [`ingest`] call.
#[derive(Debug)]
pub struct IngestReport {
    /// Final snapshot of every submitted document, in submission order.
    pub documents: Vec<DocumentRecord>,
    pub rejected: Vec<RejectedInput>,
    pub stats: IngestStats,
}

impl IngestReport {
    /// `true` when every input was accepted and processed successfully.
    pub fn all_completed(&self) -> bool {
        self.rejected.is_empty()
            && self
                .documents
                .iter()
                .all(|d| d.status == DocumentStatus::Completed)
    }
}

/// Submit every input and wait until each accepted document is terminal.
///
/// Inputs starting with `http://` or `https://` are submitted as URLs,
/// everything else is read from disk. Per-input failures (validation,
/// unreadable file) are collected in [`IngestReport::rejected`]; they never
/// abort the batch.
///
/// # Errors
/// Only a session-level refusal is fatal: [`IngestError::Unauthorized`] or
/// [`IngestError::ShutDown`] before any document was accepted stops the
/// batch, since every later input would fail the same way.
pub async fn ingest<I, S>(inputs: I, workflow: &UploadWorkflow) -> Result<IngestReport, IngestError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let start = Instant::now();
    let mut ids: Vec<DocumentId> = Vec::new();
    let mut rejected = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        let submitted = if validate::is_url(input) {
            workflow.submit_url(input).await
        } else {
            workflow.submit_path(input).await
        };
        match submitted {
            Ok(id) => ids.push(id),
            Err(e @ (IngestError::Unauthorized | IngestError::ShutDown)) if ids.is_empty() => {
                return Err(e);
            }
            Err(e) => {
                warn!("Rejected '{}': {}", input, e);
                rejected.push(RejectedInput {
                    input: input.to_string(),
                    error: e,
                });
            }
        }
    }

    info!("Submitted {} document(s), waiting for processing", ids.len());
    workflow.wait_idle().await;

    let registry = workflow.registry();
    let documents: Vec<DocumentRecord> = ids.iter().filter_map(|id| registry.get(*id)).collect();

    let count = |status: DocumentStatus| documents.iter().filter(|d| d.status == status).count();
    let stats = IngestStats {
        submitted: documents.len(),
        rejected: rejected.len(),
        completed: count(DocumentStatus::Completed),
        failed: count(DocumentStatus::Failed),
        unknown: count(DocumentStatus::Unknown),
        unfinished: documents.iter().filter(|d| !d.status.is_terminal()).count(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Ingestion finished in {}ms: {} completed, {} failed, {} unknown, {} rejected",
        stats.elapsed_ms, stats.completed, stats.failed, stats.unknown, stats.rejected
    );

    Ok(IngestReport {
        documents,
        rejected,
        stats,
    })
}
