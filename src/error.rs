// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Error taxonomy.
//!
//! Failures fall into five classes:
//! - `Validation` — bad caller arguments (out-of-range sequence, oversized range)
//! - `Format` — malformed import bundles (missing metadata, version, schema)
//! - `Persistence` — store I/O failures
//! - `State` — illegal operation for the current state (undo at floor, etc.)
//! - `Apply` — an event reducer failed and strict mode was requested
//!
//! Recovered snapshot/event corruption is NOT an error: it degrades into
//! warnings on a `ReplayResult`.

use crate::dispatch::DispatchError;
use crate::snapshot::serializer::SnapshotCodecError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("state error: {0}")]
    State(String),

    #[error("snapshot codec error: {0}")]
    SnapshotCodec(#[from] SnapshotCodecError),

    #[error("event application failed at sequence {sequence}: {source}")]
    Apply {
        sequence: u64,
        source: DispatchError,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
