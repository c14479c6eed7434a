//! SQLite persistence for annotation records.
//!
//! One row per `(documentId, annotationId)`; writes replace the row.
//! rusqlite is synchronous, so every call runs on the blocking pool behind a
//! mutex-guarded connection.

use annotation_core::store::{AnnotationStore, Result, StoreError};
use annotation_core::{AnnotationRecord, PayloadKind};
use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS annotations (
    documentId TEXT NOT NULL,
    annotationId TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL,
    updatedAt INTEGER DEFAULT (unixepoch()),
    PRIMARY KEY (documentId, annotationId)
);
"#;

const UPSERT: &str = "INSERT INTO annotations (documentId, annotationId, content, kind, updatedAt)
     VALUES (?1, ?2, ?3, ?4, unixepoch())
     ON CONFLICT(documentId, annotationId) DO UPDATE SET
         content = excluded.content,
         kind = excluded.kind,
         updatedAt = excluded.updatedAt";

/// Annotation store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create annotations table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Look up a single record.
    pub async fn get(&self, document_id: &str, annotation_id: &str) -> Result<Option<AnnotationRecord>> {
        let document_id = document_id.to_string();
        let annotation_id = annotation_id.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT content, kind FROM annotations
                     WHERE documentId = ?1 AND annotationId = ?2",
                    params![document_id, annotation_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(backend)?;

            row.map(|(content, kind)| -> Result<AnnotationRecord> {
                Ok(AnnotationRecord {
                    kind: parse_kind(&document_id, &annotation_id, &kind)?,
                    document_id: document_id.clone(),
                    annotation_id: annotation_id.clone(),
                    content,
                })
            })
            .transpose()
        })
        .await
    }

    /// Total number of stored records.
    pub async fn count(&self) -> Result<usize> {
        self.run(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM annotations", [], |row| row.get(0))
                .map_err(backend)?;
            Ok(count as usize)
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_kind(document_id: &str, annotation_id: &str, kind: &str) -> Result<PayloadKind> {
    PayloadKind::parse(kind).ok_or_else(|| StoreError::Corrupt {
        document_id: document_id.to_string(),
        annotation_id: annotation_id.to_string(),
        reason: format!("unknown kind {:?}", kind),
    })
}

#[async_trait]
impl AnnotationStore for SqliteStore {
    async fn upsert(&self, record: &AnnotationRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                UPSERT,
                params![
                    record.document_id,
                    record.annotation_id,
                    record.content,
                    record.kind.as_str(),
                ],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn list_by_document(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        let document_id = document_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT annotationId, content, kind FROM annotations
                     WHERE documentId = ?1 ORDER BY annotationId",
                )
                .map_err(backend)?;

            let rows = stmt
                .query_map(params![document_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(backend)?;

            let mut records = Vec::new();
            for row in rows {
                let (annotation_id, content, kind) = row.map_err(backend)?;
                records.push(AnnotationRecord {
                    kind: parse_kind(&document_id, &annotation_id, &kind)?,
                    document_id: document_id.clone(),
                    annotation_id,
                    content,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn delta(doc: &str, id: &str, content: &str) -> AnnotationRecord {
        AnnotationRecord::new(doc, id, content, PayloadKind::AnnotationDelta)
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert(&delta("D1", "a1", "<add/>")).await.unwrap();
        store
            .upsert(&AnnotationRecord::new("D1", "w1", "<ffield/>", PayloadKind::FieldSnapshot))
            .await
            .unwrap();

        let records = store.list_by_document("D1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], delta("D1", "a1", "<add/>"));
        assert_eq!(records[1].kind, PayloadKind::FieldSnapshot);
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert(&delta("D1", "a1", "v1")).await.unwrap();
        store.upsert(&delta("D1", "a1", "v2")).await.unwrap();
        store.upsert(&delta("D1", "a1", "v2")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get("D1", "a1").await.unwrap().unwrap();
        assert_eq!(record.content, "v2");
    }

    #[tokio::test]
    async fn test_key_includes_document() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert(&delta("D1", "a1", "first")).await.unwrap();
        store.upsert(&delta("D2", "a1", "second")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.list_by_document("D1").await.unwrap()[0].content, "first");
        assert_eq!(store.list_by_document("D2").await.unwrap()[0].content, "second");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("D1", "a1").await.unwrap().is_none());
        assert!(store.list_by_document("D1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data/xfdf.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(&delta("D1", "a1", "<add/>")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let records = store.list_by_document("D1").await.unwrap();
        assert_eq!(records, vec![delta("D1", "a1", "<add/>")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_one_row() {
        let store = SqliteStore::in_memory().unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.upsert(&delta("D1", "a1", &format!("v{}", i))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 1);
        let content = store.get("D1", "a1").await.unwrap().unwrap().content;
        assert!(content.starts_with('v'));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_reported() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO annotations (documentId, annotationId, content, kind) VALUES ('D1', 'a1', 'x', 'true')",
                [],
            )
            .unwrap();
        }

        let err = store.list_by_document("D1").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
