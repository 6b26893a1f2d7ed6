// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Snapshotting: framed state blobs plus cadence management.

pub mod manager;
pub mod serializer;

pub use manager::SnapshotManager;
pub use serializer::{SnapshotCodecError, SnapshotSerializer};
