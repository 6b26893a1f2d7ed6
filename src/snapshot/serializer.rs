// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Snapshot Serializer
//!
//! State <-> bytes, with an explicit binary frame so a reader can tell a
//! corrupt blob from a structurally invalid one.
//!
//! # Frame Format
//! ```text
//! [magic: 4 = "PSNP"][version: u32 le][compression: u8][reserved: 3]
//! [checksum: 32 = blake3(payload)][payload...]
//! ```
//!
//! The checksum covers the payload as stored (post-compression), so bit-rot
//! surfaces as `ChecksumMismatch` before any decode is attempted.
//!
//! # Round trip
//! `deserialize(serialize(s)) == s` for every representable state. Canonical
//! encoding: serde_json with sorted object keys.

use crate::event::DocumentState;
use crate::store::CompressionTag;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"PSNP";
const FRAME_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 3 + 32;

const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_GZIP: u8 = 1;

#[derive(Error, Debug)]
pub enum SnapshotCodecError {
    #[error("snapshot frame header invalid")]
    InvalidHeader,

    #[error("unsupported snapshot frame version {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    #[error("malformed state structure: {0}")]
    MalformedState(String),

    #[error("compression failed: {0}")]
    Compression(String),
}

#[derive(Clone, Debug)]
pub struct SnapshotSerializer {
    compress: bool,
}

impl SnapshotSerializer {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn compression_tag(&self) -> CompressionTag {
        if self.compress {
            CompressionTag::Gzip
        } else {
            CompressionTag::None
        }
    }

    /// Encode a state into a framed, checksummed, optionally gzipped blob.
    pub fn serialize(&self, state: &DocumentState) -> Result<Vec<u8>, SnapshotCodecError> {
        let json = serde_json::to_vec(state)
            .map_err(|e| SnapshotCodecError::MalformedState(e.to_string()))?;

        let (payload, compression) = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&json)
                .and_then(|_| encoder.finish())
                .map(|bytes| (bytes, COMPRESSION_GZIP))
                .map_err(|e| SnapshotCodecError::Compression(e.to_string()))?
        } else {
            (json, COMPRESSION_NONE)
        };

        let checksum = blake3::hash(&payload);

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(MAGIC);
        frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        frame.push(compression);
        frame.extend_from_slice(&[0u8; 3]);
        frame.extend_from_slice(checksum.as_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a framed blob. Compression is detected from the header, not
    /// from the serializer's own setting, so mixed-era snapshots decode fine.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<DocumentState, SnapshotCodecError> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(SnapshotCodecError::InvalidHeader);
        }

        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != FRAME_VERSION {
            return Err(SnapshotCodecError::UnsupportedVersion(version));
        }

        let compression = bytes[8];
        let stored_checksum: [u8; 32] = bytes[12..44].try_into().unwrap();
        let payload = &bytes[HEADER_LEN..];

        if blake3::hash(payload).as_bytes() != &stored_checksum {
            return Err(SnapshotCodecError::ChecksumMismatch);
        }

        let json = match compression {
            COMPRESSION_NONE => payload.to_vec(),
            COMPRESSION_GZIP => {
                let mut decoder = GzDecoder::new(payload);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| SnapshotCodecError::CorruptStream(e.to_string()))?;
                out
            }
            _ => return Err(SnapshotCodecError::InvalidHeader),
        };

        serde_json::from_slice(&json).map_err(|e| SnapshotCodecError::MalformedState(e.to_string()))
    }
}
