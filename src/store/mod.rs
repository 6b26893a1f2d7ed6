// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Store contracts.
//!
//! The engine owns no storage; it consumes two append-only contracts that the
//! host application implements (SQLite, files, whatever). Reference
//! implementations live in [`memory`] and [`file`].
//!
//! # Contract
//! - `insert_event` assigns the next contiguous, zero-based sequence
//! - `insert_events_batch` persists fully-formed records and preserves their
//!   sequences (the import path); out-of-order input is rejected, and an
//!   empty log adopts the batch's starting sequence
//! - `get_events` returns ascending sequence order, always
//! - `get_max_sequence` returns `None` for an empty document

pub mod file;
pub mod memory;

use crate::event::{DocumentId, EventDraft, EventRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::FileEventStore;
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};

/// Select `from <= sequence <= to` out of a contiguous, ascending log whose
/// first sequence may be non-zero (imported mid-history documents).
pub(crate) fn slice_by_sequence(
    log: &[EventRecord],
    from: u64,
    to: Option<u64>,
) -> Vec<EventRecord> {
    let Some(first) = log.first() else {
        return Vec::new();
    };
    let base = first.sequence;
    let lower = from.max(base);
    let end = base + log.len() as u64; // exclusive
    let upper = match to {
        Some(t) => t.saturating_add(1).min(end),
        None => end,
    };
    if lower >= upper {
        return Vec::new();
    }
    log[(lower - base) as usize..(upper - base) as usize].to_vec()
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("out-of-order batch insert: expected sequence {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("store corrupted: {0}")]
    Corrupted(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a snapshot blob is encoded at rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionTag {
    None,
    Gzip,
}

impl CompressionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionTag::None => "none",
            CompressionTag::Gzip => "gzip",
        }
    }
}

/// A persisted snapshot blob: document state after applying events
/// `0..=sequence`.
#[derive(Clone, Debug)]
pub struct SnapshotRecord {
    pub sequence: u64,
    pub data: Vec<u8>,
    pub compression: CompressionTag,
}

/// Append-only event log, keyed by per-document monotonic sequence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event, assigning the next sequence for the document.
    async fn insert_event(&self, document: &DocumentId, draft: EventDraft) -> StoreResult<u64>;

    /// Append fully-formed records, preserving their sequences. Used by
    /// history import; records must continue the document's log contiguously.
    async fn insert_events_batch(
        &self,
        document: &DocumentId,
        records: &[EventRecord],
    ) -> StoreResult<Vec<u64>>;

    /// Fetch events with `from <= sequence <= to` (`to = None` means latest),
    /// ascending.
    async fn get_events(
        &self,
        document: &DocumentId,
        from: u64,
        to: Option<u64>,
    ) -> StoreResult<Vec<EventRecord>>;

    /// Highest committed sequence, or `None` when the document has no events.
    async fn get_max_sequence(&self, document: &DocumentId) -> StoreResult<Option<u64>>;
}

/// Keyed store of compressed state blobs.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, returning a backend-assigned id.
    async fn insert_snapshot(
        &self,
        document: &DocumentId,
        sequence: u64,
        data: Vec<u8>,
        compression: CompressionTag,
    ) -> StoreResult<u64>;

    /// Newest snapshot with `sequence <= max_sequence`, if any.
    async fn get_latest_snapshot(
        &self,
        document: &DocumentId,
        max_sequence: u64,
    ) -> StoreResult<Option<SnapshotRecord>>;

    /// Retain only the `keep` most recent snapshots for the document.
    async fn delete_old_snapshots(&self, document: &DocumentId, keep: usize) -> StoreResult<()>;
}
