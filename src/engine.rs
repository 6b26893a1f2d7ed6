// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! History Engine — wiring for one document's timeline.
//!
//! Owns the full pipeline: producer events flow through the recorder/sampler
//! into the store, and every persisted event is applied, in order, to the
//! live document state. Snapshot cadence is observed on that same path, so a
//! snapshot at sequence S always equals the fold of events `0..=S`.
//!
//! Single-writer by construction: one engine per document, one apply task,
//! one logical timeline.

use crate::config::EngineConfig;
use crate::dispatch::{Dispatched, HandlerRegistry, MissingHandlerPolicy};
use crate::error::Result;
use crate::event::{empty_state, DocumentId, DocumentState, EventDraft};
use crate::export::HistoryExporter;
use crate::navigator::EventNavigator;
use crate::recorder::{EventRecorder, PersistOutcome};
use crate::replay::EventReplayer;
use crate::snapshot::manager::SnapshotManager;
use crate::snapshot::serializer::SnapshotSerializer;
use crate::store::{EventStore, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

pub struct HistoryEngine {
    document: DocumentId,
    config: EngineConfig,
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    registry: Arc<HandlerRegistry>,
    recorder: EventRecorder,
    live: Arc<RwLock<DocumentState>>,
    applied_rx: watch::Receiver<u64>,
}

impl HistoryEngine {
    /// Open an engine over a (possibly non-empty) document log. Existing
    /// history is replayed once to seed the live state.
    pub async fn open(
        document: DocumentId,
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        registry: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        let serializer = SnapshotSerializer::new(config.compress_snapshots);

        let initial = match events.get_max_sequence(&document).await? {
            Some(max) => {
                let replayer = EventReplayer::new(
                    events.clone(),
                    snapshots.clone(),
                    registry.clone(),
                    serializer.clone(),
                );
                let result = replayer.replay_from_snapshot(&document, max).await?;
                if result.has_issues() {
                    tracing::warn!(
                        %document,
                        warnings = result.warnings.len(),
                        "seed replay recovered from issues"
                    );
                }
                result.state
            }
            None => empty_state(),
        };

        let (recorder, outcome_rx) = EventRecorder::new(document.clone(), events.clone(), &config);
        let live = Arc::new(RwLock::new(initial));
        let (applied_tx, applied_rx) = watch::channel(0u64);

        let manager = SnapshotManager::new(
            snapshots.clone(),
            serializer,
            config.snapshot_frequency,
            config.snapshots_kept,
        );
        tokio::spawn(apply_loop(
            document.clone(),
            outcome_rx,
            live.clone(),
            registry.clone(),
            manager,
            applied_tx,
        ));

        Ok(Self {
            document,
            config,
            events,
            snapshots,
            registry,
            recorder,
            live,
            applied_rx,
        })
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Producer entry point: sample, persist, apply. Never blocks.
    pub fn record_event(&self, draft: EventDraft) {
        self.recorder.record_event(draft);
    }

    /// Drain the pipeline: flush the sampler, wait for persistence, wait for
    /// the live state to catch up.
    pub async fn flush(&self) {
        self.recorder.flush().await;
        let target = self.recorder.persisted_count();
        let mut rx = self.applied_rx.clone();
        while *rx.borrow() < target {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn pause(&self) {
        self.recorder.pause();
    }

    pub fn resume(&self) {
        self.recorder.resume();
    }

    pub fn set_sampling_interval(&self, window: Duration) {
        self.recorder.set_sampling_interval(window);
    }

    pub fn persisted_count(&self) -> u64 {
        self.recorder.persisted_count()
    }

    pub fn has_unsynced(&self) -> bool {
        self.recorder.has_unsynced()
    }

    pub fn buffered_age(&self) -> Option<Duration> {
        self.recorder.buffered_age()
    }

    /// Deep copy of the current live state.
    pub async fn live_state(&self) -> DocumentState {
        self.live.read().await.clone()
    }

    fn make_replayer(&self) -> EventReplayer {
        EventReplayer::new(
            self.events.clone(),
            self.snapshots.clone(),
            self.registry.clone(),
            SnapshotSerializer::new(self.config.compress_snapshots),
        )
    }

    /// A fresh undo/redo cursor over this document.
    pub fn navigator(&self) -> EventNavigator {
        EventNavigator::new(
            self.document.clone(),
            self.events.clone(),
            self.make_replayer(),
            self.config.cache_capacity,
        )
    }

    /// A history exporter/importer bound to this document's stores.
    pub fn exporter(&self) -> HistoryExporter {
        HistoryExporter::new(
            self.events.clone(),
            self.snapshots.clone(),
            self.make_replayer(),
            SnapshotSerializer::new(self.config.compress_snapshots),
            self.config.max_export_events,
        )
    }
}

/// Applies persisted events to the live state, strictly in order, and
/// triggers snapshots at event-count milestones.
async fn apply_loop(
    document: DocumentId,
    mut outcomes: mpsc::UnboundedReceiver<PersistOutcome>,
    live: Arc<RwLock<DocumentState>>,
    registry: Arc<HandlerRegistry>,
    manager: SnapshotManager,
    applied_tx: watch::Sender<u64>,
) {
    let mut applied: u64 = 0;
    while let Some(outcome) = outcomes.recv().await {
        match outcome {
            PersistOutcome::Persisted { record } => {
                {
                    let mut state = live.write().await;
                    let prior = state.clone();
                    let input = std::mem::replace(&mut *state, DocumentState::Null);
                    match registry.dispatch(input, &record, MissingHandlerPolicy::Strict) {
                        Ok(Dispatched::Applied(next)) => *state = next,
                        Ok(Dispatched::Skipped(unchanged)) => *state = unchanged,
                        Err(e) => {
                            tracing::error!(
                                %document,
                                sequence = record.sequence,
                                error = %e,
                                "live apply failed; state unchanged"
                            );
                            *state = prior;
                        }
                    }
                }

                let event_count = record.sequence + 1;
                if manager.should_snapshot(event_count) {
                    let state = live.read().await.clone();
                    manager
                        .create_snapshot(&document, record.sequence, &state)
                        .await;
                }

                applied += 1;
                let _ = applied_tx.send(applied);
            }
            PersistOutcome::Unsynced { event_id, error } => {
                // Recorder already surfaced the durable unsynced flag.
                tracing::warn!(%document, %event_id, %error, "event left unsynced");
            }
        }
    }
}
