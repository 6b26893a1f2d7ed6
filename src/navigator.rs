// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Event Navigator — undo/redo/seek cursor over the replayer.
//!
//! One navigator owns one document's cursor and cache; concurrent navigators
//! over the same document are unsupported without external coordination.
//!
//! # Cache isolation
//! Every state handed out is a deep copy of the cached entry. Callers can
//! mutate what they receive without corrupting later navigations to the same
//! sequence.

use crate::error::{EngineError, Result};
use crate::event::{DocumentId, DocumentState};
use crate::replay::EventReplayer;
use crate::store::EventStore;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Cache observability snapshot. Sequences are listed most-recently-used
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub sequences: Vec<u64>,
}

pub struct EventNavigator {
    document: DocumentId,
    store: Arc<dyn EventStore>,
    replayer: EventReplayer,
    current: Option<u64>,
    max_sequence: Option<u64>,
    cache: LruCache<u64, DocumentState>,
}

impl EventNavigator {
    pub fn new(
        document: DocumentId,
        store: Arc<dyn EventStore>,
        replayer: EventReplayer,
        cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).expect("capacity >= 1");
        Self {
            document,
            store,
            replayer,
            current: None,
            max_sequence: None,
            cache: LruCache::new(capacity),
        }
    }

    /// Point the cursor at the newest committed event and reconstruct that
    /// state. Errors with `State` when the document has no events yet.
    pub async fn initialize(&mut self) -> Result<DocumentState> {
        let max = self
            .store
            .get_max_sequence(&self.document)
            .await?
            .ok_or_else(|| {
                EngineError::State(format!("document '{}' has no events", self.document))
            })?;
        self.max_sequence = Some(max);
        self.navigate_to_sequence(max).await
    }

    /// Re-read the store's max sequence; call after new events were recorded
    /// so redo can reach them.
    pub async fn refresh(&mut self) -> Result<()> {
        self.max_sequence = self.store.get_max_sequence(&self.document).await?;
        Ok(())
    }

    pub fn current_sequence(&self) -> Option<u64> {
        self.current
    }

    pub fn max_sequence(&self) -> Option<u64> {
        self.max_sequence
    }

    /// Step the cursor one event back.
    pub async fn undo(&mut self) -> Result<DocumentState> {
        let current = self
            .current
            .ok_or_else(|| EngineError::State("navigator not initialized".into()))?;
        if current == 0 {
            return Err(EngineError::State("already at oldest event".into()));
        }
        self.navigate_to_sequence(current - 1).await
    }

    /// Step the cursor one event forward.
    pub async fn redo(&mut self) -> Result<DocumentState> {
        let current = self
            .current
            .ok_or_else(|| EngineError::State("navigator not initialized".into()))?;
        let max = self.max_sequence.unwrap_or(current);
        if current >= max {
            return Err(EngineError::State("already at newest event".into()));
        }
        self.navigate_to_sequence(current + 1).await
    }

    /// Seek to an absolute sequence in `[0, max]`.
    pub async fn navigate_to_sequence(&mut self, target: u64) -> Result<DocumentState> {
        let max = self
            .max_sequence
            .ok_or_else(|| EngineError::State("navigator not initialized".into()))?;
        if target > max {
            return Err(EngineError::Validation(format!(
                "target sequence {target} out of range 0..={max}"
            )));
        }

        if let Some(cached) = self.cache.get(&target) {
            metrics::counter!("palimpsest_cache_hits_total", 1);
            tracing::trace!(document = %self.document, target, "navigation cache hit");
            self.current = Some(target);
            return Ok(cached.clone());
        }
        metrics::counter!("palimpsest_cache_misses_total", 1);

        let result = self.replayer.replay_to_sequence(&self.document, target).await?;
        if result.has_issues() {
            tracing::warn!(
                document = %self.document,
                target,
                skipped = result.skipped_sequences.len(),
                warnings = result.warnings.len(),
                "navigation replay recovered from issues"
            );
        }
        self.cache.put(target, result.state.clone());
        self.current = Some(target);
        Ok(result.state)
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
            sequences: self.cache.iter().map(|(seq, _)| *seq).collect(),
        }
    }
}
