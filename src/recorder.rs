// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Event Recorder — the producer-facing entry point.
//!
//! Wraps the sampler and the event store. `record_event` never blocks, never
//! awaits and never errors: sampled events are handed to a single writer task
//! that persists them in order, retrying with bounded exponential backoff.
//! Outcomes surface on an explicit signal channel rather than ad-hoc
//! callbacks.
//!
//! # Guarantees
//! - Events reach the store in exactly emission order (one writer task)
//! - A persistence failure is retried, then reported as `Unsynced`; the
//!   editable in-memory state stays valid throughout
//! - While paused, events are dropped entirely and `flush` is a no-op

use crate::config::EngineConfig;
use crate::event::{DocumentId, EventDraft, EventRecord};
use crate::sampler::EventSampler;
use crate::store::EventStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Result of one persistence attempt chain, published on the recorder's
/// outcome channel.
#[derive(Debug)]
pub enum PersistOutcome {
    Persisted { record: EventRecord },
    Unsynced { event_id: Uuid, error: String },
}

enum PersistJob {
    Event(EventDraft),
    /// Ack once every job queued before this one has completed.
    Sync(oneshot::Sender<()>),
}

pub struct EventRecorder {
    document: DocumentId,
    sampler: Mutex<EventSampler>,
    paused: AtomicBool,
    persisted: Arc<AtomicU64>,
    unsynced: Arc<AtomicBool>,
    job_tx: mpsc::UnboundedSender<PersistJob>,
}

impl EventRecorder {
    /// Create a recorder and its outcome channel. Spawns the writer task on
    /// the current tokio runtime.
    pub fn new(
        document: DocumentId,
        store: Arc<dyn EventStore>,
        config: &EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PersistOutcome>) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let persisted = Arc::new(AtomicU64::new(0));
        let unsynced = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_loop(
            document.clone(),
            store,
            job_rx,
            outcome_tx,
            persisted.clone(),
            unsynced.clone(),
            config.persist_retry_attempts.max(1),
            config.persist_backoff_base,
        ));

        (
            Self {
                document,
                sampler: Mutex::new(EventSampler::new(config.sampling_window)),
                paused: AtomicBool::new(false),
                persisted,
                unsynced,
                job_tx,
            },
            outcome_rx,
        )
    }

    /// Producer path. Dropped entirely while paused; otherwise sampled, and
    /// an emission is queued for ordered async persistence.
    pub fn record_event(&self, draft: EventDraft) {
        if self.paused.load(Ordering::Acquire) {
            tracing::trace!(document = %self.document, "recorder paused; event dropped");
            return;
        }
        // Sampler state is plain data; a poisoned lock (panicked holder)
        // must not turn the never-failing producer path into a panic.
        let emitted = self
            .sampler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .record_event(draft);
        if let Some(draft) = emitted {
            let _ = self.job_tx.send(PersistJob::Event(draft));
        }
    }

    /// Emit any buffered event and wait until everything queued so far has
    /// been persisted (or given up on). No-op while paused.
    pub async fn flush(&self) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let flushed = self
            .sampler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .flush();
        if let Some(draft) = flushed {
            let _ = self.job_tx.send(PersistJob::Event(draft));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.job_tx.send(PersistJob::Sync(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_sampling_interval(&self, window: Duration) {
        self.sampler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .set_sampling_interval(window);
    }

    /// Events successfully persisted so far.
    pub fn persisted_count(&self) -> u64 {
        self.persisted.load(Ordering::Acquire)
    }

    /// True once any event has exhausted its retries. Durable until the host
    /// re-syncs the document by other means.
    pub fn has_unsynced(&self) -> bool {
        self.unsynced.load(Ordering::Acquire)
    }

    /// Age of the currently buffered event, for backpressure monitoring.
    /// Never a blocking signal.
    pub fn buffered_age(&self) -> Option<Duration> {
        let age = self
            .sampler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .buffered_age();
        if let Some(age) = age {
            metrics::gauge!("palimpsest_buffered_event_age_seconds", age.as_secs_f64());
        }
        age
    }
}

#[allow(clippy::too_many_arguments)]
async fn writer_loop(
    document: DocumentId,
    store: Arc<dyn EventStore>,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
    outcomes: mpsc::UnboundedSender<PersistOutcome>,
    persisted: Arc<AtomicU64>,
    unsynced: Arc<AtomicBool>,
    attempts: u32,
    backoff_base: Duration,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            PersistJob::Event(draft) => {
                persist_with_retry(
                    &document,
                    store.as_ref(),
                    draft,
                    &outcomes,
                    &persisted,
                    &unsynced,
                    attempts,
                    backoff_base,
                )
                .await;
            }
            PersistJob::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn persist_with_retry(
    document: &DocumentId,
    store: &dyn EventStore,
    draft: EventDraft,
    outcomes: &mpsc::UnboundedSender<PersistOutcome>,
    persisted: &AtomicU64,
    unsynced: &AtomicBool,
    attempts: u32,
    backoff_base: Duration,
) {
    let mut delay = backoff_base;
    for attempt in 1..=attempts {
        match store.insert_event(document, draft.clone()).await {
            Ok(sequence) => {
                persisted.fetch_add(1, Ordering::AcqRel);
                metrics::counter!("palimpsest_events_persisted_total", 1);
                let record = draft.into_record(document.clone(), sequence);
                let _ = outcomes.send(PersistOutcome::Persisted { record });
                return;
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    %document,
                    event_id = %draft.event_id,
                    attempt,
                    error = %e,
                    "event persist failed; retrying"
                );
                metrics::counter!("palimpsest_persist_retries_total", 1);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(
                    %document,
                    event_id = %draft.event_id,
                    attempts,
                    error = %e,
                    "event persist failed; giving up, document marked unsynced"
                );
                unsynced.store(true, Ordering::Release);
                metrics::counter!("palimpsest_events_unsynced_total", 1);
                let _ = outcomes.send(PersistOutcome::Unsynced {
                    event_id: draft.event_id,
                    error: e.to_string(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::store::{InMemoryEventStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn config() -> EngineConfig {
        EngineConfig {
            sampling_window: Duration::ZERO,
            persist_backoff_base: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn draft(event_type: &str) -> EventDraft {
        EventDraft::new(event_type, Payload::new())
    }

    /// Store that fails the first `failures` inserts.
    struct FlakyStore {
        inner: InMemoryEventStore,
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl crate::store::EventStore for FlakyStore {
        async fn insert_event(
            &self,
            document: &DocumentId,
            draft: EventDraft,
        ) -> StoreResult<u64> {
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Backend("disk on fire".into()));
            }
            self.inner.insert_event(document, draft).await
        }

        async fn insert_events_batch(
            &self,
            document: &DocumentId,
            records: &[EventRecord],
        ) -> StoreResult<Vec<u64>> {
            self.inner.insert_events_batch(document, records).await
        }

        async fn get_events(
            &self,
            document: &DocumentId,
            from: u64,
            to: Option<u64>,
        ) -> StoreResult<Vec<EventRecord>> {
            self.inner.get_events(document, from, to).await
        }

        async fn get_max_sequence(&self, document: &DocumentId) -> StoreResult<Option<u64>> {
            self.inner.get_max_sequence(document).await
        }
    }

    #[tokio::test]
    async fn test_record_persists_in_order() {
        let store = Arc::new(InMemoryEventStore::new());
        let doc = DocumentId::from("doc");
        let (recorder, mut outcomes) = EventRecorder::new(doc.clone(), store.clone(), &config());

        for i in 0..5 {
            recorder.record_event(draft(&format!("e{i}")));
        }
        recorder.flush().await;

        assert_eq!(recorder.persisted_count(), 5);
        assert!(!recorder.has_unsynced());

        for expected in 0..5u64 {
            match outcomes.recv().await.unwrap() {
                PersistOutcome::Persisted { record } => {
                    assert_eq!(record.sequence, expected);
                    assert_eq!(record.event_type, format!("e{expected}"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_paused_recorder_drops_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let doc = DocumentId::from("doc");
        let (recorder, _outcomes) = EventRecorder::new(doc.clone(), store.clone(), &config());

        recorder.pause();
        recorder.record_event(draft("dropped"));
        recorder.flush().await; // no-op while paused
        assert_eq!(recorder.persisted_count(), 0);

        recorder.resume();
        recorder.record_event(draft("kept"));
        recorder.flush().await;
        assert_eq!(recorder.persisted_count(), 1);
        assert_eq!(store.get_max_sequence(&doc).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryEventStore::new(),
            remaining_failures: AtomicU32::new(2),
        });
        let doc = DocumentId::from("doc");
        let (recorder, mut outcomes) = EventRecorder::new(doc.clone(), store, &config());

        recorder.record_event(draft("eventually"));
        recorder.flush().await;

        assert!(matches!(
            outcomes.recv().await.unwrap(),
            PersistOutcome::Persisted { .. }
        ));
        assert_eq!(recorder.persisted_count(), 1);
        assert!(!recorder.has_unsynced());
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unsynced() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryEventStore::new(),
            remaining_failures: AtomicU32::new(u32::MAX),
        });
        let doc = DocumentId::from("doc");
        let (recorder, mut outcomes) = EventRecorder::new(doc.clone(), store, &config());

        recorder.record_event(draft("doomed"));
        recorder.flush().await;

        assert!(matches!(
            outcomes.recv().await.unwrap(),
            PersistOutcome::Unsynced { .. }
        ));
        assert_eq!(recorder.persisted_count(), 0);
        assert!(recorder.has_unsynced());
    }

    #[tokio::test]
    async fn test_recording_survives_poisoned_sampler_lock() {
        let store = Arc::new(InMemoryEventStore::new());
        let doc = DocumentId::from("doc");
        let (recorder, _outcomes) = EventRecorder::new(doc.clone(), store.clone(), &config());
        let recorder = Arc::new(recorder);

        // Panic while holding the sampler lock to poison it.
        let poisoner = recorder.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.sampler.lock().unwrap();
            panic!("holder panicked");
        })
        .join();

        recorder.record_event(draft("after-poison"));
        recorder.flush().await;
        assert_eq!(recorder.persisted_count(), 1);
        assert!(recorder.buffered_age().is_none());
    }

    #[tokio::test]
    async fn test_sampled_burst_persists_once_plus_flush() {
        let store = Arc::new(InMemoryEventStore::new());
        let doc = DocumentId::from("doc");
        let config = EngineConfig {
            sampling_window: Duration::from_secs(60),
            ..config()
        };
        let (recorder, _outcomes) = EventRecorder::new(doc.clone(), store.clone(), &config);

        for i in 0..50 {
            recorder.record_event(draft(&format!("burst{i}")));
        }
        recorder.flush().await;

        // One immediate emission plus the flushed latest.
        assert_eq!(recorder.persisted_count(), 2);
        let events = store.get_events(&doc, 0, None).await.unwrap();
        assert_eq!(events[0].event_type, "burst0");
        assert_eq!(events[1].event_type, "burst49");
    }
}
