// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Event Replayer — deterministic state reconstruction.
//!
//! Rebuilds document state at any sequence by folding events through the
//! handler registry, using the newest usable snapshot as a base to avoid
//! full-history replay.
//!
//! # Recovery Protocol
//! 1. Find the newest snapshot with `sequence <= target`
//! 2. If it fails to decode, walk back to the next-older snapshot, repeating
//!    until one decodes or none remain (then start from empty state)
//! 3. Fold the delta events `(base, target]` on top
//!
//! # Invariants
//! - Replaying an unchanged log twice yields deep-equal states
//! - Corruption never aborts a replay; it degrades into warnings
//! - Per-event failures leave the pre-error state untouched for that step
//!   (`continue_on_error = true`, the default) or abort (`= false`)

use crate::dispatch::{Dispatched, HandlerRegistry, MissingHandlerPolicy};
use crate::error::{EngineError, Result};
use crate::event::{empty_state, DocumentId, DocumentState, EventRecord};
use crate::snapshot::serializer::SnapshotSerializer;
use crate::store::{EventStore, SnapshotStore};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a replay, including everything that went wrong along the way.
/// Partial failure is never hidden.
#[derive(Debug)]
pub struct ReplayResult {
    pub state: DocumentState,
    /// Sequences whose events could not be applied (skipped, state carried
    /// through unchanged).
    pub skipped_sequences: Vec<u64>,
    /// Human-readable descriptions of every recovered problem.
    pub warnings: Vec<String>,
}

impl ReplayResult {
    pub fn has_issues(&self) -> bool {
        !self.skipped_sequences.is_empty() || !self.warnings.is_empty()
    }
}

pub struct EventReplayer {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    registry: Arc<HandlerRegistry>,
    serializer: SnapshotSerializer,
    continue_on_error: bool,
}

impl EventReplayer {
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        registry: Arc<HandlerRegistry>,
        serializer: SnapshotSerializer,
    ) -> Self {
        Self {
            events,
            snapshots,
            registry,
            serializer,
            continue_on_error: true,
        }
    }

    /// Abort on the first event application failure instead of skipping.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Fold events `from..=to` from empty state. `to = None` means latest.
    pub async fn replay(
        &self,
        document: &DocumentId,
        from: u64,
        to: Option<u64>,
    ) -> Result<ReplayResult> {
        if let Some(to) = to {
            if from > to {
                return Err(EngineError::Validation(format!(
                    "replay range inverted: from {from} > to {to}"
                )));
            }
        }
        let events = self.events.get_events(document, from, to).await?;
        let mut result = ReplayResult {
            state: empty_state(),
            skipped_sequences: Vec::new(),
            warnings: Vec::new(),
        };
        self.fold(&events, &mut result)?;
        Ok(result)
    }

    /// Reconstruct state at `max_sequence` from the newest usable snapshot
    /// plus delta replay. Owns the corruption fallback chain.
    pub async fn replay_from_snapshot(
        &self,
        document: &DocumentId,
        max_sequence: u64,
    ) -> Result<ReplayResult> {
        let mut result = ReplayResult {
            state: empty_state(),
            skipped_sequences: Vec::new(),
            warnings: Vec::new(),
        };

        // Walk snapshots newest-first until one decodes.
        let mut base_sequence: Option<u64> = None;
        let mut bound = max_sequence;
        loop {
            let Some(snapshot) = self.snapshots.get_latest_snapshot(document, bound).await? else {
                break;
            };
            match self.serializer.deserialize(&snapshot.data) {
                Ok(state) => {
                    result.state = state;
                    base_sequence = Some(snapshot.sequence);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        %document,
                        sequence = snapshot.sequence,
                        error = %e,
                        "snapshot unreadable; falling back to older snapshot"
                    );
                    metrics::counter!("palimpsest_corrupt_snapshots_total", 1);
                    result.warnings.push(format!(
                        "snapshot at sequence {} unreadable ({e}); fell back",
                        snapshot.sequence
                    ));
                    if snapshot.sequence == 0 {
                        break;
                    }
                    bound = snapshot.sequence - 1;
                }
            }
        }

        let from = base_sequence.map(|s| s + 1).unwrap_or(0);
        if from <= max_sequence {
            let delta = self
                .events
                .get_events(document, from, Some(max_sequence))
                .await?;
            tracing::debug!(
                %document,
                max_sequence,
                base = ?base_sequence,
                delta = delta.len(),
                "snapshot-assisted replay"
            );
            self.fold(&delta, &mut result)?;
        }
        Ok(result)
    }

    /// Navigator entry point: snapshot-assisted reconstruction at `target`,
    /// with latency accounting.
    pub async fn replay_to_sequence(
        &self,
        document: &DocumentId,
        target: u64,
    ) -> Result<ReplayResult> {
        let start = Instant::now();
        let result = self.replay_from_snapshot(document, target).await?;
        metrics::histogram!(
            "palimpsest_replay_duration_seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    /// Strictly sequential fold of `events` into `result.state`. Never
    /// parallelized: ordering is the whole point.
    fn fold(&self, events: &[EventRecord], result: &mut ReplayResult) -> Result<()> {
        for event in events {
            // Keep a copy to restore when a reducer fails mid-application.
            let prior = if self.continue_on_error {
                Some(result.state.clone())
            } else {
                None
            };
            let input = std::mem::replace(&mut result.state, DocumentState::Null);
            match self
                .registry
                .dispatch(input, event, MissingHandlerPolicy::Lenient)
            {
                Ok(Dispatched::Applied(next)) => result.state = next,
                Ok(Dispatched::Skipped(unchanged)) => {
                    result.state = unchanged;
                    result.skipped_sequences.push(event.sequence);
                    result.warnings.push(format!(
                        "no handler for event type '{}' at sequence {}; skipped",
                        event.event_type, event.sequence
                    ));
                }
                Err(e) => {
                    if let Some(prior) = prior {
                        tracing::warn!(
                            sequence = event.sequence,
                            error = %e,
                            "event application failed; skipping"
                        );
                        result.state = prior;
                        result.skipped_sequences.push(event.sequence);
                        result
                            .warnings
                            .push(format!("event at sequence {} failed: {e}", event.sequence));
                    } else {
                        return Err(EngineError::Apply {
                            sequence: event.sequence,
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
