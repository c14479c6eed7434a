//! AnnotationStore trait abstraction for durable annotation state.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `SqliteStore` (in annotation-daemon) - SQLite via rusqlite
//!
//! A store holds exactly one record per `(document_id, annotation_id)`.
//! `upsert` replaces the whole record atomically; readers never see a
//! half-written record.

use crate::record::AnnotationRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt record {document_id}/{annotation_id}: {reason}")]
    Corrupt {
        document_id: String,
        annotation_id: String,
        reason: String,
    },

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable key-value table of annotation records.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Insert or replace the record stored under its `(document_id, annotation_id)`.
    async fn upsert(&self, record: &AnnotationRecord) -> Result<()>;

    /// All current records for a document. Order carries no meaning.
    async fn list_by_document(&self, document_id: &str) -> Result<Vec<AnnotationRecord>>;
}

/// In-memory store for testing
pub struct InMemoryStore {
    records: RwLock<BTreeMap<(String, String), AnnotationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Total number of records across all documents.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a single record.
    pub fn get(&self, document_id: &str, annotation_id: &str) -> Option<AnnotationRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(&(document_id.to_string(), annotation_id.to_string()))
            .cloned()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnotationStore for InMemoryStore {
    async fn upsert(&self, record: &AnnotationRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn list_by_document(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PayloadKind;

    fn delta(doc: &str, id: &str, content: &str) -> AnnotationRecord {
        AnnotationRecord::new(doc, id, content, PayloadKind::AnnotationDelta)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryStore::new();
        let record = delta("D1", "a1", "<add/>");

        store.upsert(&record).await.unwrap();
        store.upsert(&record).await.unwrap();

        let rows = store.list_by_document("D1").await.unwrap();
        assert_eq!(rows, vec![record]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_content_and_kind() {
        let store = InMemoryStore::new();
        store.upsert(&delta("D1", "a1", "v1")).await.unwrap();

        let replacement = AnnotationRecord::new("D1", "a1", "v2", PayloadKind::FieldSnapshot);
        store.upsert(&replacement).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("D1", "a1"), Some(replacement));
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_interfere() {
        let store = InMemoryStore::new();
        store.upsert(&delta("D1", "a1", "one")).await.unwrap();
        store.upsert(&delta("D1", "a2", "two")).await.unwrap();
        store.upsert(&delta("D1", "a1", "one-b")).await.unwrap();

        let rows = store.list_by_document("D1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.get("D1", "a1").unwrap().content, "one-b");
        assert_eq!(store.get("D1", "a2").unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_same_annotation_id_in_two_documents() {
        let store = InMemoryStore::new();
        store.upsert(&delta("D1", "a1", "first")).await.unwrap();
        store.upsert(&delta("D2", "a1", "second")).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("D1", "a1").unwrap().content, "first");
        assert_eq!(store.get("D2", "a1").unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_list_unknown_document_is_empty() {
        let store = InMemoryStore::new();
        store.upsert(&delta("D1", "a1", "x")).await.unwrap();

        assert!(store.list_by_document("nope").await.unwrap().is_empty());
    }
}
