//! Annotation records: the unit of persistence.

use serde::{Deserialize, Serialize};

/// How a consuming client applies a payload.
///
/// The relay stores and forwards both kinds the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadKind {
    /// A full add/modify/delete annotation command.
    AnnotationDelta,
    /// The current value of a single form field widget.
    FieldSnapshot,
}

impl PayloadKind {
    /// Map the wire `widget` flag to a kind.
    pub fn from_widget_flag(widget: bool) -> Self {
        if widget {
            PayloadKind::FieldSnapshot
        } else {
            PayloadKind::AnnotationDelta
        }
    }

    /// The wire `widget` flag for this kind.
    pub fn is_widget(&self) -> bool {
        matches!(self, PayloadKind::FieldSnapshot)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::AnnotationDelta => "delta",
            PayloadKind::FieldSnapshot => "field",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delta" => Some(PayloadKind::AnnotationDelta),
            "field" => Some(PayloadKind::FieldSnapshot),
            _ => None,
        }
    }
}

/// Latest known state of one annotation on one document.
///
/// Uniquely keyed by `(document_id, annotation_id)`; writes replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub document_id: String,
    pub annotation_id: String,
    /// Opaque serialized payload (XFDF)
    pub content: String,
    pub kind: PayloadKind,
}

impl AnnotationRecord {
    pub fn new(
        document_id: impl Into<String>,
        annotation_id: impl Into<String>,
        content: impl Into<String>,
        kind: PayloadKind,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            annotation_id: annotation_id.into(),
            content: content.into(),
            kind,
        }
    }

    /// Storage key.
    pub fn key(&self) -> (String, String) {
        (self.document_id.clone(), self.annotation_id.clone())
    }
}
