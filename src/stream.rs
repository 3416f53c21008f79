//! Streaming view of the registry: registry events as a `futures::Stream`.
//!
//! ## Why stream?
//!
//! The observer trait suits callbacks (progress bars, toasts). A UI or a
//! service that already runs an async loop usually prefers to `select!`
//! over a stream instead. [`event_stream`] wraps
//! [`DocumentRegistry::subscribe`] and [`watch_document`] narrows it to one
//! document, ending once that document reaches a terminal state.
//!
//! A slow consumer that falls more than the feed capacity behind skips the
//! events it missed (logged at `warn`); call
//! [`DocumentRegistry::list`] to resynchronise.

use crate::model::DocumentId;
use crate::registry::{DocumentRegistry, RegistryEvent};
use futures::stream::StreamExt;
use std::pin::Pin;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::warn;

/// A boxed stream of registry events.
pub type EventStream = Pin<Box<dyn Stream<Item = RegistryEvent> + Send>>;

/// Every registry event from now on, in publication order.
pub fn event_stream(registry: &DocumentRegistry) -> EventStream {
    let stream = BroadcastStream::new(registry.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Event stream lagged, {} event(s) skipped", skipped);
                None
            }
        }
    });
    Box::pin(stream)
}

/// Events of one document, ending after its terminal status change.
///
/// If the document is already terminal when this is called the stream is
/// empty.
pub fn watch_document(registry: &DocumentRegistry, id: DocumentId) -> EventStream {
    // Subscribe before reading the snapshot so no transition is missed.
    let events = event_stream(registry);
    let already_done = registry
        .get(id)
        .is_some_and(|record| record.status.is_terminal());
    if already_done {
        return Box::pin(futures::stream::empty());
    }

    let stream = futures::stream::unfold((events, false), move |(mut events, finished)| async move {
        if finished {
            return None;
        }
        loop {
            let event = events.next().await?;
            if event.document_id() != id {
                continue;
            }
            let terminal = matches!(
                event,
                RegistryEvent::StatusChanged { ref record, .. } if record.status.is_terminal()
            );
            return Some((event, (events, terminal)));
        }
    });
    Box::pin(stream)
}
