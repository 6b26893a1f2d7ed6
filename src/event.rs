// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Event Log as Primary Truth
//!
//! The canonical event representation. Every document change is expressed as
//! an `EventRecord`; the engine attaches no meaning to payloads beyond
//! identity, ordering and the type tag.
//!
//! # Invariants
//! - Events are immutable once committed
//! - Sequences are zero-based, contiguous and strictly increasing per document
//! - Same event log => same replayed state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque, type-specific event payload. Kept as a JSON object so export
/// bundles can flatten it alongside the envelope fields.
pub type Payload = serde_json::Map<String, Value>;

/// Reconstructed document state. The engine treats it as an opaque JSON
/// value; reducers supplied by the owning application give it meaning.
pub type DocumentState = Value;

/// The state of a document before any event has been applied.
pub fn empty_state() -> DocumentState {
    Value::Object(serde_json::Map::new())
}

/// Per-document identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An event as produced by the editor, before the store has assigned a
/// sequence number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub event_type: String,
    pub payload: Payload,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            event_type: event_type.into(),
            payload,
        }
    }

    /// Promote to a committed record once the store has assigned a sequence.
    pub fn into_record(self, document_id: DocumentId, sequence: u64) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            timestamp: self.timestamp,
            event_type: self.event_type,
            sequence,
            document_id,
            payload: self.payload,
        }
    }
}

/// A committed, immutable event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub timestamp: u64,
    pub event_type: String,
    pub sequence: u64,
    pub document_id: DocumentId,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_into_record() {
        let draft = EventDraft::new("node.move", Payload::new());
        let id = draft.event_id;
        let record = draft.into_record(DocumentId::from("doc-1"), 7);

        assert_eq!(record.event_id, id);
        assert_eq!(record.sequence, 7);
        assert_eq!(record.document_id.as_str(), "doc-1");
        assert_eq!(record.event_type, "node.move");
    }

    #[test]
    fn test_record_json_roundtrip() {
        let mut payload = Payload::new();
        payload.insert("x".into(), serde_json::json!(10));

        let record = EventDraft::new("node.move", payload).into_record(DocumentId::from("d"), 0);

        let json = serde_json::to_string(&record).unwrap();
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
