// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! palimpsest: a local, single-writer event-sourcing engine for structured
//! document editors — unlimited undo/redo, deterministic replay, periodic
//! compressed snapshots, and portable history export/import.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod export;
pub mod navigator;
pub mod recorder;
pub mod replay;
pub mod sampler;
pub mod snapshot;
pub mod store;
pub mod telemetry;

pub use config::EngineConfig;
pub use dispatch::{DispatchError, Dispatched, HandlerRegistry, MissingHandlerPolicy};
pub use engine::HistoryEngine;
pub use error::{EngineError, Result};
pub use event::{empty_state, DocumentId, DocumentState, EventDraft, EventRecord, Payload};
pub use export::{ExportBundle, HistoryExporter, EXPORT_VERSION};
pub use navigator::{CacheStats, EventNavigator};
pub use recorder::{EventRecorder, PersistOutcome};
pub use replay::{EventReplayer, ReplayResult};
pub use sampler::EventSampler;
pub use snapshot::{SnapshotCodecError, SnapshotManager, SnapshotSerializer};
pub use store::{
    CompressionTag, EventStore, FileEventStore, InMemoryEventStore, InMemorySnapshotStore,
    SnapshotRecord, SnapshotStore, StoreError,
};
