// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! In-memory reference stores.
//!
//! Used by tests and as the default backing for throwaway documents. Both
//! stores honor the full contract, including contiguous sequence assignment
//! and batch-insert ordering checks.

use crate::event::{DocumentId, EventDraft, EventRecord};
use crate::store::{
    slice_by_sequence, CompressionTag, EventStore, SnapshotRecord, SnapshotStore, StoreError,
    StoreResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory event log indexed by document id.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<DocumentId, Vec<EventRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across all documents (test helper).
    pub fn len(&self) -> usize {
        self.events.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, document: &DocumentId, draft: EventDraft) -> StoreResult<u64> {
        let mut log = self.events.entry(document.clone()).or_default();
        let sequence = log.last().map(|r| r.sequence + 1).unwrap_or(0);
        log.push(draft.into_record(document.clone(), sequence));
        Ok(sequence)
    }

    async fn insert_events_batch(
        &self,
        document: &DocumentId,
        records: &[EventRecord],
    ) -> StoreResult<Vec<u64>> {
        let mut log = self.events.entry(document.clone()).or_default();
        // An empty log adopts the batch's starting sequence, so mid-history
        // bundles can be imported into a fresh document.
        let mut next = match log.last() {
            Some(last) => last.sequence + 1,
            None => records.first().map(|r| r.sequence).unwrap_or(0),
        };
        // Validate the whole batch before touching the log: all-or-nothing.
        for record in records {
            if record.sequence != next {
                return Err(StoreError::OutOfOrder {
                    expected: next,
                    got: record.sequence,
                });
            }
            next += 1;
        }
        let mut assigned = Vec::with_capacity(records.len());
        for record in records {
            assigned.push(record.sequence);
            log.push(record.clone());
        }
        Ok(assigned)
    }

    async fn get_events(
        &self,
        document: &DocumentId,
        from: u64,
        to: Option<u64>,
    ) -> StoreResult<Vec<EventRecord>> {
        match self.events.get(document) {
            Some(log) => Ok(slice_by_sequence(&log, from, to)),
            None => Ok(Vec::new()),
        }
    }

    async fn get_max_sequence(&self, document: &DocumentId) -> StoreResult<Option<u64>> {
        Ok(self
            .events
            .get(document)
            .and_then(|log| log.last().map(|r| r.sequence)))
    }
}

/// In-memory snapshot store. Snapshots are kept sorted by sequence; inserting
/// at an existing sequence replaces the old blob.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: DashMap<DocumentId, Vec<SnapshotRecord>>,
    next_id: AtomicU64,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequences currently held for a document, ascending (test helper).
    pub fn sequences(&self, document: &DocumentId) -> Vec<u64> {
        self.snapshots
            .get(document)
            .map(|s| s.iter().map(|r| r.sequence).collect())
            .unwrap_or_default()
    }

    /// Overwrite the blob at `sequence` with garbage, keeping the entry
    /// (test helper for corruption fallback scenarios).
    pub fn corrupt(&self, document: &DocumentId, sequence: u64, garbage: Vec<u8>) {
        if let Some(mut snaps) = self.snapshots.get_mut(document) {
            if let Some(entry) = snaps.iter_mut().find(|r| r.sequence == sequence) {
                entry.data = garbage;
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert_snapshot(
        &self,
        document: &DocumentId,
        sequence: u64,
        data: Vec<u8>,
        compression: CompressionTag,
    ) -> StoreResult<u64> {
        let mut snaps = self.snapshots.entry(document.clone()).or_default();
        snaps.retain(|r| r.sequence != sequence);
        snaps.push(SnapshotRecord {
            sequence,
            data,
            compression,
        });
        snaps.sort_by_key(|r| r.sequence);
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn get_latest_snapshot(
        &self,
        document: &DocumentId,
        max_sequence: u64,
    ) -> StoreResult<Option<SnapshotRecord>> {
        Ok(self.snapshots.get(document).and_then(|snaps| {
            snaps
                .iter()
                .rev()
                .find(|r| r.sequence <= max_sequence)
                .cloned()
        }))
    }

    async fn delete_old_snapshots(&self, document: &DocumentId, keep: usize) -> StoreResult<()> {
        if let Some(mut snaps) = self.snapshots.get_mut(document) {
            let len = snaps.len();
            if len > keep {
                snaps.drain(0..len - keep);
            }
        }
        Ok(())
    }
}
