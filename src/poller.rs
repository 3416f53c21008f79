//! Status poller: drive one processing job to a terminal state.
//!
//! ## Schedule
//!
//! ```text
//! upload ok ─ initial_poll_delay ─▶ GET ─ poll_interval ─▶ GET ─ … ─▶ terminal
//!                                    │
//!                                    └─ error ─ backoff ─▶ GET (≤ max_poll_failures)
//! ```
//!
//! The next query is scheduled from the previous *response*, not on a fixed
//! clock, so two queries for the same job never overlap.
//!
//! ## Retry Strategy
//!
//! A failed query is retried with exponential backoff
//! (`poll_retry_backoff * 2^(n-1)`, capped at four poll intervals) while the
//! error is transient and fewer than `max_poll_failures` consecutive queries
//! have failed. A permanent error (job not found, undecodable body) or an
//! exhausted budget marks the document `Unknown` and stops. Polling on a
//! non-terminal status is unbounded: a slow job is not a failing one.
//!
//! Every status request holds a permit of the session-wide semaphore, which
//! caps how many requests are in flight when many documents finish
//! uploading at once.

use crate::error::TransportError;
use crate::model::{DocumentId, DocumentStatus, JobId, StatusReport};
use crate::registry::Transition;
use crate::workflow::Shared;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Failed,
    /// Gave up after transport errors.
    Unknown,
    /// Cancelled before reaching a terminal state.
    Cancelled,
    /// The record no longer accepted updates (sealed or already terminal).
    Abandoned,
}

/// Delay before retry number `failures` (1-based).
pub fn backoff_delay(base: Duration, poll_interval: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(poll_interval.saturating_mul(4))
}

/// Sleep for `delay`, returning `false` if cancelled first.
async fn pause(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

/// One status request under the concurrency cap and the poll timeout.
async fn query(shared: &Shared, job: &JobId) -> Result<StatusReport, TransportError> {
    let _permit = shared
        .poll_limiter
        .acquire()
        .await
        .map_err(|_| TransportError::NetworkFailure("poll limiter closed".into()))?;
    let deadline = shared.config.poll_timeout;
    match timeout(deadline, shared.transport.fetch_status(job)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            secs: deadline.as_secs(),
        }),
    }
}

/// Poll `job` until the document reaches a terminal state or `token` fires.
///
/// The document must already be `Processing`. All writes go through
/// [`Shared::apply_status`], so the terminal notification fires exactly once.
pub(crate) async fn poll_until_terminal(
    shared: &Shared,
    id: DocumentId,
    job: JobId,
    token: &CancellationToken,
) -> PollOutcome {
    let config = &shared.config;
    debug!(
        "{}: first status query for job {} in {:?}",
        id, job, config.initial_poll_delay
    );
    if !pause(config.initial_poll_delay, token).await {
        return PollOutcome::Cancelled;
    }

    let mut failures = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            r = query(shared, &job) => r,
        };
        if token.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        let delay = match result {
            Ok(report) => {
                failures = 0;
                let status = report.status.document_status();
                debug!("{}: job {} reports {:?}", id, job, report.status);
                if shared.apply_status(id, status, report.detail) == Transition::Rejected {
                    return PollOutcome::Abandoned;
                }
                if status.is_terminal() {
                    info!("{}: processing {}", id, status);
                    return match status {
                        DocumentStatus::Completed => PollOutcome::Completed,
                        _ => PollOutcome::Failed,
                    };
                }
                config.poll_interval
            }
            Err(e) => {
                failures += 1;
                if !e.is_retryable() || failures >= config.max_poll_failures {
                    warn!(
                        "{}: giving up on job {} after {} failed poll(s): {}",
                        id, job, failures, e
                    );
                    let reason = format!("status polling stopped: {e}");
                    return if shared
                        .apply_status(id, DocumentStatus::Unknown, Some(reason))
                        .is_applied()
                    {
                        PollOutcome::Unknown
                    } else {
                        PollOutcome::Abandoned
                    };
                }
                let backoff = backoff_delay(config.poll_retry_backoff, config.poll_interval, failures);
                warn!(
                    "{}: poll {}/{} failed ({}), retrying in {:?}",
                    id, failures, config.max_poll_failures, e, backoff
                );
                backoff
            }
        };

        if !pause(delay, token).await {
            return PollOutcome::Cancelled;
        }
    }
}
