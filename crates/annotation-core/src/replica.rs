//! Client-side view of one document's annotations.
//!
//! Live envelopes and history records go through the same `apply`, which is
//! why a joining client can replay a snapshot in any order and still converge
//! with peers that saw every change live.

use crate::envelope::{ChangeEnvelope, HistoryEntry};
use crate::record::{AnnotationRecord, PayloadKind};
use std::collections::HashMap;

/// Latest payload applied for one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAnnotation {
    pub kind: PayloadKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReplica {
    document_id: String,
    annotations: HashMap<String, AppliedAnnotation>,
}

impl DocumentReplica {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            annotations: HashMap::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Apply a live change. Returns false if it belongs to another document.
    pub fn apply_envelope(&mut self, envelope: &ChangeEnvelope) -> bool {
        if envelope.document_id != self.document_id {
            return false;
        }
        self.apply(&envelope.annotation_id, envelope.kind, &envelope.content);
        true
    }

    /// Apply a stored record. Returns false if it belongs to another document.
    pub fn apply_record(&mut self, record: &AnnotationRecord) -> bool {
        if record.document_id != self.document_id {
            return false;
        }
        self.apply(&record.annotation_id, record.kind, &record.content);
        true
    }

    /// Apply a history response entry (implicitly for this document).
    pub fn apply_history_entry(&mut self, entry: &HistoryEntry) {
        self.apply(
            &entry.annotation_id,
            PayloadKind::from_widget_flag(entry.widget),
            &entry.xfdf_string,
        );
    }

    /// Replace the state of one annotation.
    pub fn apply(&mut self, annotation_id: &str, kind: PayloadKind, content: &str) {
        self.annotations.insert(
            annotation_id.to_string(),
            AppliedAnnotation {
                kind,
                content: content.to_string(),
            },
        );
    }

    pub fn get(&self, annotation_id: &str) -> Option<&AppliedAnnotation> {
        self.annotations.get(annotation_id)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, content: &str) -> AnnotationRecord {
        AnnotationRecord::new("D1", id, content, PayloadKind::AnnotationDelta)
    }

    #[test]
    fn test_live_and_catch_up_paths_converge() {
        let live = [
            ChangeEnvelope::new("D1", "a1", "v1", PayloadKind::AnnotationDelta),
            ChangeEnvelope::new("D1", "w1", "on", PayloadKind::FieldSnapshot),
            ChangeEnvelope::new("D1", "a1", "v2", PayloadKind::AnnotationDelta),
        ];
        let mut peer = DocumentReplica::new("D1");
        for envelope in &live {
            peer.apply_envelope(envelope);
        }

        // Snapshot holds only the latest record per id, in arbitrary order
        let snapshot = [
            AnnotationRecord::new("D1", "w1", "on", PayloadKind::FieldSnapshot),
            record("a1", "v2"),
        ];
        let mut joiner = DocumentReplica::new("D1");
        for r in snapshot.iter().rev() {
            joiner.apply_record(r);
        }

        assert_eq!(peer, joiner);
    }

    #[test]
    fn test_snapshot_replay_order_does_not_matter() {
        let records = [record("a1", "x"), record("a2", "y"), record("a3", "z")];

        let mut forward = DocumentReplica::new("D1");
        records.iter().for_each(|r| {
            forward.apply_record(r);
        });

        let mut backward = DocumentReplica::new("D1");
        records.iter().rev().for_each(|r| {
            backward.apply_record(r);
        });

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut replica = DocumentReplica::new("D1");
        replica.apply_record(&record("a1", "x"));
        let once = replica.clone();
        replica.apply_record(&record("a1", "x"));

        assert_eq!(replica, once);
    }

    #[test]
    fn test_other_documents_are_ignored() {
        let mut replica = DocumentReplica::new("D1");
        let foreign = ChangeEnvelope::new("D2", "a1", "x", PayloadKind::AnnotationDelta);

        assert!(!replica.apply_envelope(&foreign));
        assert!(replica.is_empty());
    }

    #[test]
    fn test_history_entry_uses_widget_flag() {
        let mut replica = DocumentReplica::new("D1");
        replica.apply_history_entry(&HistoryEntry {
            annotation_id: "w1".into(),
            xfdf_string: "<ffield/>".into(),
            widget: true,
        });

        assert_eq!(replica.get("w1").unwrap().kind, PayloadKind::FieldSnapshot);
    }
}
