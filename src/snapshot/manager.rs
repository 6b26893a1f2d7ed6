// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Snapshot Manager — cadence and persistence.
//!
//! Snapshotting is a performance optimization only: any failure here is
//! logged and skipped, never propagated, so event recording can never be
//! blocked by it.

use crate::event::{DocumentId, DocumentState};
use crate::snapshot::serializer::SnapshotSerializer;
use crate::store::SnapshotStore;
use std::sync::Arc;
use std::time::Instant;

pub struct SnapshotManager {
    store: Arc<dyn SnapshotStore>,
    serializer: SnapshotSerializer,
    /// Snapshot every N events.
    frequency: u64,
    /// Retain only this many snapshots per document.
    keep: usize,
}

impl SnapshotManager {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        serializer: SnapshotSerializer,
        frequency: u64,
        keep: usize,
    ) -> Self {
        Self {
            store,
            serializer,
            frequency,
            keep,
        }
    }

    /// True iff `event_count` is a positive multiple of the frequency.
    pub fn should_snapshot(&self, event_count: u64) -> bool {
        self.frequency > 0 && event_count > 0 && event_count % self.frequency == 0
    }

    /// Serialize and persist a snapshot of `state` at `sequence`, then prune
    /// old snapshots. Infallible by contract; failures are logged.
    pub async fn create_snapshot(
        &self,
        document: &DocumentId,
        sequence: u64,
        state: &DocumentState,
    ) {
        let start = Instant::now();

        let bytes = match self.serializer.serialize(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%document, sequence, error = %e, "snapshot serialization failed; skipping");
                return;
            }
        };

        let size = bytes.len();
        match self
            .store
            .insert_snapshot(document, sequence, bytes, self.serializer.compression_tag())
            .await
        {
            Ok(_) => {
                metrics::gauge!("palimpsest_snapshot_size_bytes", size as f64);
                metrics::histogram!(
                    "palimpsest_snapshot_duration_seconds",
                    start.elapsed().as_secs_f64()
                );
                tracing::debug!(%document, sequence, size, "snapshot persisted");
            }
            Err(e) => {
                tracing::error!(%document, sequence, error = %e, "snapshot persist failed; skipping");
                return;
            }
        }

        if let Err(e) = self.store.delete_old_snapshots(document, self.keep).await {
            tracing::warn!(%document, error = %e, "snapshot pruning failed");
        }
    }
}
