//! Wire envelope types for annotation changes.
//!
//! Clients exchange JSON envelopes over one persistent connection:
//! `{"documentId":"D1","annotationId":"a1","xfdfString":"<xfdf .../>","widget":false}`
//!
//! The relay parses an envelope only to extract routing keys. What it forwards
//! to peers is the original [`Frame`], byte for byte, so fields it does not
//! know about survive the trip.

use crate::record::{AnnotationRecord, PayloadKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Invalid envelope JSON: {0}")]
    Json(String),

    #[error("Envelope is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Envelope field `{0}` is empty")]
    EmptyField(&'static str),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// One data message as it arrived on (or will leave through) a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Incoming wire shape. Fields are optional here so a missing key can be
/// reported by name instead of as a generic serde error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    document_id: Option<String>,
    annotation_id: Option<String>,
    xfdf_string: Option<String>,
    #[serde(default)]
    widget: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a> {
    document_id: &'a str,
    annotation_id: &'a str,
    xfdf_string: &'a str,
    widget: bool,
}

/// A parsed annotation change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEnvelope {
    pub document_id: String,
    pub annotation_id: String,
    pub content: String,
    pub kind: PayloadKind,
}

impl ChangeEnvelope {
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

    /// Parse an envelope from raw frame bytes.
    ///
    /// `documentId`, `annotationId` and `xfdfString` are required and the two
    /// ids must be non-empty. `widget` defaults to `false`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let wire: WireEnvelope =
            serde_json::from_slice(data).map_err(|e| EnvelopeError::Json(e.to_string()))?;

        let document_id = wire
            .document_id
            .ok_or(EnvelopeError::MissingField("documentId"))?;
        let annotation_id = wire
            .annotation_id
            .ok_or(EnvelopeError::MissingField("annotationId"))?;
        let content = wire
            .xfdf_string
            .ok_or(EnvelopeError::MissingField("xfdfString"))?;

        if document_id.is_empty() {
            return Err(EnvelopeError::EmptyField("documentId"));
        }
        if annotation_id.is_empty() {
            return Err(EnvelopeError::EmptyField("annotationId"));
        }

        Ok(Self {
            document_id,
            annotation_id,
            content,
            kind: PayloadKind::from_widget_flag(wire.widget),
        })
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> String {
        let wire = WireEnvelopeRef {
            document_id: &self.document_id,
            annotation_id: &self.annotation_id,
            xfdf_string: &self.content,
            widget: self.kind.is_widget(),
        };
        serde_json::to_string(&wire).expect("ChangeEnvelope serialization should not fail")
    }

    /// Convenience for clients and tests: the envelope as a text frame.
    pub fn to_frame(&self) -> Frame {
        Frame::Text(self.to_json())
    }

    pub fn into_record(self) -> AnnotationRecord {
        AnnotationRecord {
            document_id: self.document_id,
            annotation_id: self.annotation_id,
            content: self.content,
            kind: self.kind,
        }
    }
}

/// One record in a history response.
///
/// The document id is implied by the query, so it is not repeated per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub annotation_id: String,
    pub xfdf_string: String,
    #[serde(default)]
    pub widget: bool,
}

impl HistoryEntry {
    pub fn into_record(self, document_id: &str) -> AnnotationRecord {
        AnnotationRecord {
            document_id: document_id.to_string(),
            annotation_id: self.annotation_id,
            content: self.xfdf_string,
            kind: PayloadKind::from_widget_flag(self.widget),
        }
    }
}

impl From<&AnnotationRecord> for HistoryEntry {
    fn from(record: &AnnotationRecord) -> Self {
        Self {
            annotation_id: record.annotation_id.clone(),
            xfdf_string: record.content.clone(),
            widget: record.kind.is_widget(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotation_delta() {
        let raw = br#"{"documentId":"D1","annotationId":"a1","xfdfString":"<add/>","widget":false}"#;
        let env = ChangeEnvelope::parse(raw).unwrap();

        assert_eq!(env.document_id, "D1");
        assert_eq!(env.annotation_id, "a1");
        assert_eq!(env.content, "<add/>");
        assert_eq!(env.kind, PayloadKind::AnnotationDelta);
    }

    #[test]
    fn test_parse_field_snapshot() {
        let raw = br#"{"documentId":"D1","annotationId":"w7","xfdfString":"<ffield/>","widget":true}"#;
        let env = ChangeEnvelope::parse(raw).unwrap();
        assert_eq!(env.kind, PayloadKind::FieldSnapshot);
    }

    #[test]
    fn test_widget_defaults_to_delta() {
        let raw = br#"{"documentId":"D1","annotationId":"a1","xfdfString":"x"}"#;
        let env = ChangeEnvelope::parse(raw).unwrap();
        assert_eq!(env.kind, PayloadKind::AnnotationDelta);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = br#"{"documentId":"D1","annotationId":"a1","xfdfString":"x","author":"Andy"}"#;
        assert!(ChangeEnvelope::parse(raw).is_ok());
    }

    #[test]
    fn test_invalid_json() {
        let err = ChangeEnvelope::parse(b"not json at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::Json(_)));

        let err = ChangeEnvelope::parse(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, EnvelopeError::Json(_)));
    }

    #[test]
    fn test_missing_fields() {
        let err = ChangeEnvelope::parse(br#"{"annotationId":"a1","xfdfString":"x"}"#).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingField("documentId"));

        let err = ChangeEnvelope::parse(br#"{"documentId":"D1","xfdfString":"x"}"#).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingField("annotationId"));

        let err = ChangeEnvelope::parse(br#"{"documentId":"D1","annotationId":"a1"}"#).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingField("xfdfString"));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let err = ChangeEnvelope::parse(br#"{"documentId":"","annotationId":"a1","xfdfString":"x"}"#)
            .unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyField("documentId"));

        let err = ChangeEnvelope::parse(br#"{"documentId":"D1","annotationId":"","xfdfString":"x"}"#)
            .unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyField("annotationId"));
    }

    #[test]
    fn test_to_json_uses_wire_names() {
        let env = ChangeEnvelope::new("D1", "w1", "<ffield/>", PayloadKind::FieldSnapshot);
        let value: serde_json::Value = serde_json::from_str(&env.to_json()).unwrap();

        assert_eq!(value["documentId"], "D1");
        assert_eq!(value["annotationId"], "w1");
        assert_eq!(value["xfdfString"], "<ffield/>");
        assert_eq!(value["widget"], true);
    }

    #[test]
    fn test_history_entry_from_record() {
        let record = AnnotationRecord::new("D1", "a1", "<add/>", PayloadKind::AnnotationDelta);
        let entry = HistoryEntry::from(&record);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"annotationId": "a1", "xfdfString": "<add/>", "widget": false})
        );
        assert_eq!(entry.into_record("D1"), record);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(Frame::Text("{}".into()).as_bytes(), b"{}");
        assert_eq!(Frame::Binary(vec![1, 2]).len(), 2);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }
}
