// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! History Exporter — portable event-range bundles.
//!
//! Serializes a contiguous event range (plus, when available, the nearest
//! snapshot at or before the range start) into a self-describing JSON bundle,
//! and imports such bundles back, validating before anything is written.
//!
//! # Import contract
//! - Validation is fail-fast: one bad event fails the whole import before a
//!   single record is persisted
//! - After persisting, a verification replay must reconstruct the log
//!   cleanly; a failure there is a state error. Already-written events are
//!   NOT rolled back — rollback is the caller's responsibility

use crate::error::{EngineError, Result};
use crate::event::{DocumentId, DocumentState, EventRecord, Payload};
use crate::replay::EventReplayer;
use crate::snapshot::serializer::SnapshotSerializer;
use crate::store::{EventStore, SnapshotStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Bundle format version this build writes and accepts.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub document_id: DocumentId,
    pub export_version: u32,
    pub exported_at: String,
    pub event_range: EventRange,
    pub event_count: u64,
    pub snapshot_sequence: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEvent {
    pub event_id: String,
    pub timestamp: u64,
    pub event_type: String,
    pub event_sequence: u64,
    pub document_id: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl From<EventRecord> for ExportedEvent {
    fn from(record: EventRecord) -> Self {
        Self {
            event_id: record.event_id.to_string(),
            timestamp: record.timestamp,
            event_type: record.event_type,
            event_sequence: record.sequence,
            document_id: record.document_id.0,
            payload: record.payload,
        }
    }
}

/// Snapshot carried inside a bundle as plain JSON state, so bundles stay
/// human-readable and compression-agnostic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSnapshot {
    pub sequence: u64,
    pub state: DocumentState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub metadata: ExportMetadata,
    pub snapshot: Option<ExportedSnapshot>,
    pub events: Vec<ExportedEvent>,
}

pub struct HistoryExporter {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    replayer: EventReplayer,
    serializer: SnapshotSerializer,
    max_export_events: u64,
}

impl HistoryExporter {
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        replayer: EventReplayer,
        serializer: SnapshotSerializer,
        max_export_events: u64,
    ) -> Self {
        Self {
            events,
            snapshots,
            replayer,
            serializer,
            max_export_events,
        }
    }

    /// Export events `start..=end` as a portable bundle.
    pub async fn export_range(
        &self,
        document: &DocumentId,
        start: u64,
        end: u64,
    ) -> Result<ExportBundle> {
        if start > end {
            return Err(EngineError::Validation(format!(
                "export range inverted: start {start} > end {end}"
            )));
        }
        // start <= end holds here, so only the +1 can overflow (full-u64
        // spans); saturate rather than wrap past the cap.
        let span = (end - start).checked_add(1).unwrap_or(u64::MAX);
        if span > self.max_export_events {
            return Err(EngineError::Validation(format!(
                "export range of {span} events exceeds maximum {}",
                self.max_export_events
            )));
        }

        let records = self.events.get_events(document, start, Some(end)).await?;
        if records.is_empty() {
            return Err(EngineError::State(format!(
                "range {start}..={end} resolves to zero events"
            )));
        }

        // Nearest snapshot at or before the range start, if it decodes.
        let snapshot = match self.snapshots.get_latest_snapshot(document, start).await? {
            Some(record) => match self.serializer.deserialize(&record.data) {
                Ok(state) => Some(ExportedSnapshot {
                    sequence: record.sequence,
                    state,
                }),
                Err(e) => {
                    tracing::warn!(
                        %document,
                        sequence = record.sequence,
                        error = %e,
                        "snapshot unreadable; exporting without it"
                    );
                    None
                }
            },
            None => None,
        };

        let metadata = ExportMetadata {
            document_id: document.clone(),
            export_version: EXPORT_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            event_range: EventRange { start, end },
            event_count: records.len() as u64,
            snapshot_sequence: snapshot.as_ref().map(|s| s.sequence),
        };

        metrics::counter!("palimpsest_exports_total", 1);
        Ok(ExportBundle {
            metadata,
            snapshot,
            events: records.into_iter().map(ExportedEvent::from).collect(),
        })
    }

    /// Import a bundle into `document`, validate-first, then persist and
    /// verify by replay. Returns the final sequence reached.
    pub async fn import_from_json(
        &self,
        raw: &Value,
        document: &DocumentId,
        validate_schema: bool,
    ) -> Result<u64> {
        let metadata = raw
            .get("metadata")
            .ok_or_else(|| EngineError::Format("bundle is missing top-level metadata".into()))?;

        let version = metadata
            .get("exportVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::Format("metadata.exportVersion missing".into()))?;
        if version != EXPORT_VERSION as u64 {
            return Err(EngineError::Format(format!(
                "unsupported export version {version} (supported: {EXPORT_VERSION})"
            )));
        }

        let raw_events = raw
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Format("bundle is missing events array".into()))?;

        let declared = metadata
            .get("eventCount")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::Format("metadata.eventCount missing".into()))?;
        if declared != raw_events.len() as u64 {
            return Err(EngineError::Format(format!(
                "eventCount {declared} does not match {} bundled events",
                raw_events.len()
            )));
        }
        if raw_events.is_empty() {
            return Err(EngineError::Format("bundle contains no events".into()));
        }

        let range: EventRange = metadata
            .get("eventRange")
            .and_then(|r| serde_json::from_value(r.clone()).ok())
            .ok_or_else(|| EngineError::Format("metadata.eventRange missing or malformed".into()))?;
        if range.start > range.end {
            return Err(EngineError::Format(format!(
                "eventRange inverted: start {} > end {}",
                range.start, range.end
            )));
        }

        if validate_schema {
            for (index, event) in raw_events.iter().enumerate() {
                validate_event_schema(index, event)?;
            }
        }

        let mut records = Vec::with_capacity(raw_events.len());
        for (index, event) in raw_events.iter().enumerate() {
            let exported: ExportedEvent = serde_json::from_value(event.clone())
                .map_err(|e| EngineError::Format(format!("event #{index} malformed: {e}")))?;
            let event_id = Uuid::parse_str(&exported.event_id).map_err(|e| {
                EngineError::Format(format!("event #{index} has malformed eventId: {e}"))
            })?;
            records.push(EventRecord {
                event_id,
                timestamp: exported.timestamp,
                event_type: exported.event_type,
                sequence: exported.event_sequence,
                document_id: document.clone(),
                payload: exported.payload,
            });
        }

        // Declared range must actually cover the bundled sequences; a
        // tampered range fails here, before anything is written.
        for record in &records {
            if record.sequence < range.start || record.sequence > range.end {
                return Err(EngineError::Format(format!(
                    "event at sequence {} falls outside declared range {}..={}",
                    record.sequence, range.start, range.end
                )));
            }
        }

        // Bundled snapshot gives the verification replay its base when the
        // range does not start at zero. Losing it is survivable.
        if let Some(snapshot) = raw.get("snapshot").filter(|s| !s.is_null()) {
            let snapshot: ExportedSnapshot = serde_json::from_value(snapshot.clone())
                .map_err(|e| EngineError::Format(format!("bundle snapshot malformed: {e}")))?;
            match self.serializer.serialize(&snapshot.state) {
                Ok(bytes) => {
                    if let Err(e) = self
                        .snapshots
                        .insert_snapshot(
                            document,
                            snapshot.sequence,
                            bytes,
                            self.serializer.compression_tag(),
                        )
                        .await
                    {
                        tracing::warn!(%document, error = %e, "bundled snapshot not persisted");
                    }
                }
                Err(e) => {
                    tracing::warn!(%document, error = %e, "bundled snapshot not serializable");
                }
            }
        }

        let final_sequence = records.last().map(|r| r.sequence).unwrap_or(0);
        self.events.insert_events_batch(document, &records).await?;

        // Confirm the imported log reconstructs cleanly. No rollback here.
        let verification = self
            .replayer
            .replay_to_sequence(document, final_sequence)
            .await
            .map_err(|e| {
                EngineError::State(format!("import verification replay failed: {e}"))
            })?;
        if verification.has_issues() {
            return Err(EngineError::State(format!(
                "import verification replay reported issues: {}",
                verification.warnings.join("; ")
            )));
        }

        metrics::counter!("palimpsest_imports_total", 1);
        tracing::info!(%document, final_sequence, "history import verified");
        Ok(final_sequence)
    }
}

fn validate_event_schema(index: usize, event: &Value) -> Result<()> {
    let object = event
        .as_object()
        .ok_or_else(|| EngineError::Format(format!("event #{index} is not an object")))?;

    let event_id = object
        .get("eventId")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Format(format!("event #{index} is missing eventId")))?;
    if Uuid::parse_str(event_id).is_err() {
        return Err(EngineError::Format(format!(
            "event #{index} has malformed eventId '{event_id}'"
        )));
    }

    if object.get("timestamp").and_then(Value::as_u64).is_none() {
        return Err(EngineError::Format(format!(
            "event #{index} timestamp must be a non-negative integer"
        )));
    }

    match object.get("eventType").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => {}
        _ => {
            return Err(EngineError::Format(format!(
                "event #{index} eventType must be a non-empty string"
            )))
        }
    }

    if object.get("eventSequence").and_then(Value::as_u64).is_none() {
        return Err(EngineError::Format(format!(
            "event #{index} eventSequence must be a non-negative integer"
        )));
    }

    match object.get("documentId").and_then(Value::as_str) {
        Some(d) if !d.is_empty() => {}
        _ => {
            return Err(EngineError::Format(format!(
                "event #{index} documentId must be a non-empty string"
            )))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_wire_shape() {
        let bundle = ExportBundle {
            metadata: ExportMetadata {
                document_id: DocumentId::from("doc-1"),
                export_version: EXPORT_VERSION,
                exported_at: "2026-01-01T00:00:00+00:00".into(),
                event_range: EventRange { start: 2, end: 3 },
                event_count: 1,
                snapshot_sequence: None,
            },
            snapshot: None,
            events: vec![ExportedEvent {
                event_id: "5f0c054e-22f7-4b3e-95ba-553b7a72a59e".into(),
                timestamp: 1700000000000,
                event_type: "node.move".to_string(),
                event_sequence: 2,
                document_id: "doc-1".into(),
                payload: {
                    let mut p = Payload::new();
                    p.insert("x".into(), json!(4));
                    p
                },
            }],
        };

        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["metadata"]["documentId"], json!("doc-1"));
        assert_eq!(value["metadata"]["eventRange"], json!({"start": 2, "end": 3}));
        assert_eq!(value["metadata"]["snapshotSequence"], json!(null));
        // Payload fields are flattened beside the envelope.
        assert_eq!(value["events"][0]["x"], json!(4));
        assert_eq!(value["events"][0]["eventSequence"], json!(2));

        // And they come back out of the flattened form.
        let back: ExportBundle = serde_json::from_value(value).unwrap();
        assert_eq!(back.events[0].payload.get("x"), Some(&json!(4)));
    }

    #[test]
    fn test_schema_validation_rejects_negative_timestamp() {
        let event = json!({
            "eventId": "5f0c054e-22f7-4b3e-95ba-553b7a72a59e",
            "timestamp": -5,
            "eventType": "t",
            "eventSequence": 0,
            "documentId": "d"
        });
        assert!(matches!(
            validate_event_schema(0, &event),
            Err(EngineError::Format(_))
        ));
    }

    #[test]
    fn test_schema_validation_rejects_bad_uuid() {
        let event = json!({
            "eventId": "not-a-uuid",
            "timestamp": 5,
            "eventType": "t",
            "eventSequence": 0,
            "documentId": "d"
        });
        assert!(matches!(
            validate_event_schema(0, &event),
            Err(EngineError::Format(_))
        ));
    }
}
