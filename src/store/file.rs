// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Append-Only File Event Store
//!
//! Durable reference implementation of [`EventStore`]: one JSON-lines file
//! holding every committed event, fsync'd per append. No truncation or
//! rewriting, ever.
//!
//! # File Format
//! ```text
//! {"format":1}            <- header line
//! {..event record..}
//! {..event record..}
//! ```
//!
//! # Crash behavior
//! A process killed mid-write leaves at most one incomplete trailing line.
//! On open that tail is dropped with a warning and the log resumes from the
//! last complete event. A malformed line anywhere else fails closed.

use crate::event::{DocumentId, EventDraft, EventRecord};
use crate::store::{slice_by_sequence, EventStore, StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LogHeader {
    format: u32,
}

struct Inner {
    writer: BufWriter<File>,
    /// In-memory mirror of the on-disk log, rebuilt on open.
    logs: HashMap<DocumentId, Vec<EventRecord>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner").field("logs", &self.logs).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileEventStore {
    /// Open or create a log file. An existing file is scanned in full to
    /// rebuild the per-document indexes and validate contiguity.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let mut logs: HashMap<DocumentId, Vec<EventRecord>> = HashMap::new();

        if existed {
            let reader = BufReader::new(File::open(&path)?);
            let mut lines = reader.lines().enumerate().peekable();

            let (_, header_line) = lines
                .next()
                .ok_or_else(|| StoreError::Corrupted("log file is empty".into()))?;
            let header: LogHeader = serde_json::from_str(&header_line?)
                .map_err(|e| StoreError::Corrupted(format!("bad log header: {e}")))?;
            if header.format != FORMAT_VERSION {
                return Err(StoreError::Corrupted(format!(
                    "unsupported log format {}",
                    header.format
                )));
            }

            while let Some((line_no, line)) = lines.next() {
                let line = line?;
                match serde_json::from_str::<EventRecord>(&line) {
                    Ok(record) => {
                        let log = logs.entry(record.document_id.clone()).or_default();
                        // A document's first on-disk record fixes its base
                        // sequence (non-zero for imported mid-history logs).
                        if let Some(last) = log.last() {
                            if record.sequence != last.sequence + 1 {
                                return Err(StoreError::Corrupted(format!(
                                    "sequence gap at line {}: expected {}, got {}",
                                    line_no + 1,
                                    last.sequence + 1,
                                    record.sequence
                                )));
                            }
                        }
                        log.push(record);
                    }
                    Err(e) if lines.peek().is_none() => {
                        // Incomplete tail from a crash mid-write; resume from
                        // the last complete event.
                        tracing::warn!(
                            line = line_no + 1,
                            error = %e,
                            "dropping incomplete trailing log line"
                        );
                        break;
                    }
                    Err(e) => {
                        return Err(StoreError::Corrupted(format!(
                            "malformed event at line {}: {e}",
                            line_no + 1
                        )));
                    }
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if !existed {
            serde_json::to_writer(&mut file, &LogHeader {
                format: FORMAT_VERSION,
            })
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                logs,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(inner: &mut Inner, record: &EventRecord) -> StoreResult<()> {
        let line =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        Ok(())
    }

    fn sync(inner: &mut Inner) -> StoreResult<()> {
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn insert_event(&self, document: &DocumentId, draft: EventDraft) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let sequence = inner
            .logs
            .get(document)
            .and_then(|l| l.last())
            .map(|r| r.sequence + 1)
            .unwrap_or(0);
        let record = draft.into_record(document.clone(), sequence);
        Self::append_line(&mut inner, &record)?;
        Self::sync(&mut inner)?;
        inner.logs.entry(document.clone()).or_default().push(record);
        Ok(sequence)
    }

    async fn insert_events_batch(
        &self,
        document: &DocumentId,
        records: &[EventRecord],
    ) -> StoreResult<Vec<u64>> {
        let mut inner = self.inner.lock().await;
        // An empty log adopts the batch's starting sequence (mid-history
        // bundle import into a fresh document).
        let mut next = match inner.logs.get(document).and_then(|l| l.last()) {
            Some(last) => last.sequence + 1,
            None => records.first().map(|r| r.sequence).unwrap_or(0),
        };
        for record in records {
            if record.sequence != next {
                return Err(StoreError::OutOfOrder {
                    expected: next,
                    got: record.sequence,
                });
            }
            next += 1;
        }
        for record in records {
            Self::append_line(&mut inner, record)?;
        }
        // One fsync for the whole batch.
        Self::sync(&mut inner)?;
        inner
            .logs
            .entry(document.clone())
            .or_default()
            .extend_from_slice(records);
        Ok(records.iter().map(|r| r.sequence).collect())
    }

    async fn get_events(
        &self,
        document: &DocumentId,
        from: u64,
        to: Option<u64>,
    ) -> StoreResult<Vec<EventRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .get(document)
            .map(|log| slice_by_sequence(log, from, to))
            .unwrap_or_default())
    }

    async fn get_max_sequence(&self, document: &DocumentId) -> StoreResult<Option<u64>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .get(document)
            .and_then(|log| log.last().map(|r| r.sequence)))
    }
}
