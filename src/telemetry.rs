// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Telemetry initialization (logs + metric descriptions).
//!
//! The engine only emits through the `metrics` facade; installing a recorder
//! (Prometheus, statsd, test capture) is the host application's job.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing and describe the engine's metrics. Idempotent, safe to
/// call from tests.
pub fn init_telemetry() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "palimpsest=debug".into()),
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();

        metrics::describe_counter!(
            "palimpsest_events_persisted_total",
            "Events durably appended to the event store"
        );
        metrics::describe_counter!(
            "palimpsest_persist_retries_total",
            "Event persistence attempts that failed and were retried"
        );
        metrics::describe_counter!(
            "palimpsest_events_unsynced_total",
            "Events dropped after exhausting persistence retries"
        );
        metrics::describe_counter!(
            "palimpsest_corrupt_snapshots_total",
            "Snapshots that failed to decode during replay fallback"
        );
        metrics::describe_counter!("palimpsest_cache_hits_total", "Navigator cache hits");
        metrics::describe_counter!("palimpsest_cache_misses_total", "Navigator cache misses");
        metrics::describe_counter!("palimpsest_exports_total", "History bundles exported");
        metrics::describe_counter!("palimpsest_imports_total", "History bundles imported");
        metrics::describe_histogram!(
            "palimpsest_replay_duration_seconds",
            "Time taken to reconstruct state at a sequence"
        );
        metrics::describe_histogram!(
            "palimpsest_snapshot_duration_seconds",
            "Time taken to serialize and persist a snapshot"
        );
        metrics::describe_gauge!(
            "palimpsest_snapshot_size_bytes",
            "Size of the last persisted snapshot"
        );
        metrics::describe_gauge!(
            "palimpsest_buffered_event_age_seconds",
            "Age of the event currently buffered in the sampler"
        );
    });
}
