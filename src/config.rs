// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Engine configuration.

use std::time::Duration;

/// Engine tuning knobs. Defaults match the documented behavior of the
/// history subsystem; all values can be overridden per document.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Minimum interval between sampled emissions during bursts.
    /// Zero disables batching entirely.
    pub sampling_window: Duration,
    /// Take a snapshot every N persisted events.
    pub snapshot_frequency: u64,
    /// How many snapshots to retain per document.
    pub snapshots_kept: usize,
    /// Navigator LRU cache capacity.
    pub cache_capacity: usize,
    /// Largest event range a single export bundle may carry.
    pub max_export_events: u64,
    /// Gzip snapshot blobs.
    pub compress_snapshots: bool,
    /// Persistence retry budget for a single event.
    pub persist_retry_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub persist_backoff_base: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling_window: Duration::from_millis(100),
            snapshot_frequency: 1000,
            snapshots_kept: 10,
            cache_capacity: 10,
            max_export_events: 10_000,
            compress_snapshots: true,
            persist_retry_attempts: 3,
            persist_backoff_base: Duration::from_millis(50),
        }
    }
}
