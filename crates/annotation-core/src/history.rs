//! History service: the current state of a document for a joining client.

use crate::envelope::HistoryEntry;
use crate::record::AnnotationRecord;
use crate::store::{AnnotationStore, Result};
use std::sync::Arc;
use tracing::{debug, error};

/// Serves document snapshots out of the store.
///
/// A snapshot holds one record per annotation. Each record fully determines
/// its annotation, so clients may replay them in any order.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn AnnotationStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn AnnotationStore>) -> Self {
        Self { store }
    }

    /// All current records for `document_id`.
    ///
    /// Store failures are logged and returned, never panicked on.
    pub async fn snapshot(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        match self.store.list_by_document(document_id).await {
            Ok(records) => {
                debug!("History for {}: {} record(s)", document_id, records.len());
                Ok(records)
            }
            Err(e) => {
                error!("Failed to load history for {}: {}", document_id, e);
                Err(e)
            }
        }
    }

    /// Snapshot in the wire shape served to clients.
    pub async fn entries(&self, document_id: &str) -> Result<Vec<HistoryEntry>> {
        let records = self.snapshot(document_id).await?;
        Ok(records.iter().map(HistoryEntry::from).collect())
    }
}
