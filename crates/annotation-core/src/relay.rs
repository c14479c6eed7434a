//! Broadcast relay: persist an incoming change, then fan it out to peers.
//!
//! For every frame received from a connection:
//! 1. Parse the envelope. Malformed frames are logged and dropped.
//! 2. Upsert the record. Failures are logged; the broadcast still happens.
//! 3. Forward the original frame to every other connection on the document,
//!    and to connections that have not joined a document yet.
//!
//! Steps 2 and 3 run under a per-document lock so peers of one document see
//! changes in the order they were persisted. A joining client that fetches
//! history after any peer received a change will find that change stored.

use crate::envelope::{ChangeEnvelope, EnvelopeError, Frame};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::AnnotationStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// What happened to one incoming frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The frame was not a valid envelope; nothing was stored or sent.
    Dropped(EnvelopeError),
    /// The change was processed and broadcast.
    Relayed {
        /// Whether the store accepted the write
        persisted: bool,
        /// Peers the frame was queued for
        delivered: usize,
        /// Peers unregistered because their queue was full or closed
        evicted: usize,
    },
}

pub struct Relay {
    store: Arc<dyn AnnotationStore>,
    registry: Arc<ConnectionRegistry>,
    /// document id -> lock serializing persist + broadcast for that document
    ordering: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Relay {
    pub fn new(store: Arc<dyn AnnotationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            ordering: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one frame from `from`. Never fails: every error is handled here.
    pub async fn on_message(&self, from: ConnectionId, frame: Frame) -> RelayOutcome {
        let envelope = match ChangeEnvelope::parse(frame.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "Dropping malformed envelope from {} ({} bytes): {}",
                    from,
                    frame.len(),
                    e
                );
                return RelayOutcome::Dropped(e);
            }
        };

        let document_id = envelope.document_id.clone();
        if self.registry.bind(from, &document_id) {
            info!("{} joined document {} with its first change", from, document_id);
        }

        debug!(
            "Change from {}: {}/{} ({:?}, {} bytes)",
            from,
            document_id,
            envelope.annotation_id,
            envelope.kind,
            envelope.content.len()
        );

        let lock = self.document_lock(&document_id);
        let ordered = lock.lock().await;

        let record = envelope.into_record();
        let persisted = match self.store.upsert(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to persist {}/{}: {} (broadcasting anyway)",
                    record.document_id, record.annotation_id, e
                );
                false
            }
        };

        let mut delivered = 0;
        let mut evicted = 0;
        for target in self.registry.broadcast_targets(&document_id, from) {
            match target.try_deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping {} from document {}: {}",
                        target.id(),
                        document_id,
                        e
                    );
                    if self.registry.unregister(target.id()) {
                        evicted += 1;
                    }
                }
            }
        }

        drop(ordered);
        self.release_document_lock(&document_id, lock);

        debug!(
            "Relayed {}/{} to {} peer(s)",
            document_id, record.annotation_id, delivered
        );

        RelayOutcome::Relayed {
            persisted,
            delivered,
            evicted,
        }
    }

    fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut ordering = self.ordering.lock().unwrap_or_else(|e| e.into_inner());
        ordering
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget a document's lock once nobody else holds or waits on it.
    fn release_document_lock(&self, document_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut ordering = self.ordering.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            ordering.remove(document_id);
        }
    }
}
