//! Loop recording and playback.
//!
//! [`LoopRecorder`] snapshots a root value each tick, stamps it with the
//! registry's definition hash, appends it to a loop stream, and keeps the
//! most recent records in memory for resynchronizing peers.
//! [`LoopPlayback`] reads the stream back, checks each record against the
//! current definitions, and restores the payloads.

use std::io::{Read, Write};

use crate::config::WalkConfig;
use crate::loop_record::{LoopError, LoopReader, LoopRecord, LoopWriter, StaleDefinition};
use crate::registry::Registry;
use crate::serialize::{DeserializeContext, ErrorKind, SerializeContext, WalkError};

// ---------------------------------------------------------------------------
// SnapshotRing
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of the most recent records. The oldest entry is
/// evicted when full.
#[derive(Debug, Clone)]
pub struct SnapshotRing {
    entries: Vec<Option<LoopRecord>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Records ever pushed, including evicted ones.
    total_pushed: u64,
}

impl SnapshotRing {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_pushed: 0,
        }
    }

    /// Store `record` as the newest entry and return it.
    pub fn push(&mut self, record: LoopRecord) -> &LoopRecord {
        let capacity = self.capacity();
        let slot = self.head;
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
        self.total_pushed += 1;
        self.entries[slot].insert(record)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// 0 = oldest retained, len-1 = newest.
    pub fn get(&self, index: usize) -> Option<&LoopRecord> {
        if index >= self.len {
            return None;
        }
        let start = if self.len < self.capacity() {
            0
        } else {
            self.head
        };
        self.entries[(start + index) % self.capacity()].as_ref()
    }

    pub fn latest(&self) -> Option<&LoopRecord> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LoopRecord> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// LoopRecorder
// ---------------------------------------------------------------------------

/// Failure to capture a record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("snapshot failed: {0}")]
    Walk(#[from] WalkError),
    #[error("append failed: {0}")]
    Loop(#[from] LoopError),
}

impl RecordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::Walk(e) => e.kind(),
            RecordError::Loop(e) => e.kind(),
        }
    }
}

/// Captures snapshots into a loop stream.
///
/// A failed walk never reaches the stream: the payload is complete before
/// the record is encoded, and the record is written with one `write_all`.
#[derive(Debug)]
pub struct LoopRecorder<'r, W: Write> {
    registry: &'r Registry,
    writer: LoopWriter<W>,
    history: SnapshotRing,
    walk: WalkConfig,
}

impl<'r, W: Write> LoopRecorder<'r, W> {
    pub fn new(registry: &'r Registry, writer: LoopWriter<W>, history: usize) -> Self {
        Self {
            registry,
            writer,
            history: SnapshotRing::new(history),
            walk: WalkConfig::default(),
        }
    }

    pub fn with_walk_config(mut self, walk: WalkConfig) -> Self {
        self.walk = walk;
        self
    }

    /// Snapshot `root`, append it under `comment`, and return the record.
    pub fn capture<T: 'static>(
        &mut self,
        comment: impl Into<String>,
        root: &T,
    ) -> Result<&LoopRecord, RecordError> {
        let payload = SerializeContext::new(self.registry)
            .with_config(self.walk)
            .snapshot(root)?;
        let record = LoopRecord::new(comment, self.registry.definition_hash(), payload);
        self.record(record)
    }

    /// Append an already-built record, e.g. one received from a peer.
    pub fn record(&mut self, record: LoopRecord) -> Result<&LoopRecord, RecordError> {
        self.writer.append(&record)?;
        Ok(self.history.push(record))
    }

    pub fn history(&self) -> &SnapshotRing {
        &self.history
    }

    pub fn records_written(&self) -> u64 {
        self.writer.records_written()
    }

    pub fn flush(&mut self) -> Result<(), LoopError> {
        self.writer.flush()
    }

    /// Flush and return the writer.
    pub fn finish(mut self) -> Result<LoopWriter<W>, LoopError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

// ---------------------------------------------------------------------------
// LoopPlayback
// ---------------------------------------------------------------------------

/// What to do with a record whose definition hash does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Stop with [`PlaybackError::Stale`].
    #[default]
    Reject,
    /// Log and move on to the next record.
    Skip,
}

/// One restored record.
#[derive(Debug)]
pub struct Frame<T> {
    /// Position of the record in the stream, counting skipped records.
    pub index: u64,
    pub comment: String,
    pub root: T,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("record {index}: {source}")]
    Stale {
        index: u64,
        #[source]
        source: StaleDefinition,
    },
    #[error("record {index}: {source}")]
    Walk {
        index: u64,
        #[source]
        source: WalkError,
    },
    #[error(transparent)]
    Loop(#[from] LoopError),
}

impl PlaybackError {
    /// Staleness is recoverable; everything else is a configuration, protocol
    /// or I/O failure.
    pub fn is_stale(&self) -> bool {
        matches!(self, PlaybackError::Stale { .. })
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PlaybackError::Stale { .. } => None,
            PlaybackError::Walk { source, .. } => Some(source.kind()),
            PlaybackError::Loop(e) => Some(e.kind()),
        }
    }
}

/// Restores the records of a loop stream in order.
///
/// After a `Stale` or `Walk` error the stream is still at a record boundary
/// and the next call continues with the following record. A `Loop` error is
/// final.
#[derive(Debug)]
pub struct LoopPlayback<'r, R: Read> {
    registry: &'r Registry,
    reader: LoopReader<R>,
    policy: StalePolicy,
    walk: WalkConfig,
    index: u64,
    skipped: u64,
}

impl<'r, R: Read> LoopPlayback<'r, R> {
    pub fn new(registry: &'r Registry, reader: LoopReader<R>) -> Self {
        Self {
            registry,
            reader,
            policy: StalePolicy::default(),
            walk: WalkConfig::default(),
            index: 0,
            skipped: 0,
        }
    }

    pub fn with_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_walk_config(mut self, walk: WalkConfig) -> Self {
        self.walk = walk;
        self
    }

    /// Stale records skipped so far under [`StalePolicy::Skip`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Restore the next applicable record. `Ok(None)` at end of stream.
    pub fn next_frame<T: 'static>(&mut self) -> Result<Option<Frame<T>>, PlaybackError> {
        loop {
            let Some(record) = self.reader.next_record()? else {
                return Ok(None);
            };
            let index = self.index;
            self.index += 1;

            if let Err(stale) = record.verify(self.registry.definition_hash()) {
                match self.policy {
                    StalePolicy::Reject => {
                        return Err(PlaybackError::Stale {
                            index,
                            source: stale,
                        });
                    }
                    StalePolicy::Skip => {
                        tracing::warn!(index, comment = %record.comment, %stale, "skipping stale loop record");
                        self.skipped += 1;
                        continue;
                    }
                }
            }

            let root = DeserializeContext::new(self.registry)
                .with_config(self.walk)
                .restore::<T>(&record.payload)
                .map_err(|source| PlaybackError::Walk { index, source })?;
            return Ok(Some(Frame {
                index,
                comment: record.comment,
                root,
            }));
        }
    }

    /// Restore every remaining record, stopping at the first error.
    pub fn collect_frames<T: 'static>(mut self) -> Result<Vec<Frame<T>>, PlaybackError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame::<T>()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
