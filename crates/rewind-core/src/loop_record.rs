//! Loop files: append-only sequences of commented, versioned snapshots.
//!
//! One record on disk:
//!
//! ```text
//! "loop" ' ' comment ' ' 0x00 | hash w0 w1 w2 w3 (u32 LE) | len (i32 LE) | payload
//! ```
//!
//! Records are independent; there is no file header and no cross-record
//! state. The definition hash identifies the registry layout that produced
//! the payload and is compared by the consumer before restoring.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::LoopConfig;
use crate::hash::DefinitionHash;
use crate::serialize::ErrorKind;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// First four bytes of every record.
pub const LOOP_MAGIC: [u8; 4] = *b"loop";

const SEPARATOR: u8 = b' ';
const TERMINATOR: u8 = 0;

/// Fixed bytes around the comment: magic, two separators, terminator.
const FRAMING_LEN: usize = LOOP_MAGIC.len() + 3;
const HASH_LEN: usize = 16;
const LENGTH_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reading or writing loop records.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("bad magic {found:02X?}: not a loop record")]
    BadMagic { found: [u8; 4] },
    #[error("expected separator after {after}, found 0x{found:02X}")]
    MissingSeparator { after: &'static str, found: u8 },
    #[error("record truncated in {field} at offset {offset}")]
    Truncated { field: &'static str, offset: u64 },
    #[error("comment longer than {max} bytes")]
    CommentTooLong { max: usize },
    #[error("comment is not valid UTF-8")]
    InvalidUtf8,
    #[error("negative payload length {0}")]
    NegativeLength(i32),
    #[error("payload length {len} exceeds limit {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("comment cannot be written: {reason}")]
    InvalidComment { reason: &'static str },
    #[error("reader stopped after an earlier malformed record")]
    ReaderFailed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoopError::Io(_) => ErrorKind::Io,
            LoopError::InvalidComment { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Protocol,
        }
    }
}

/// A well-formed record produced by a different set of definitions.
///
/// Recoverable: the caller decides whether to skip, log, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stale loop record: recorded with {recorded}, current definitions are {expected}")]
pub struct StaleDefinition {
    pub recorded: DefinitionHash,
    pub expected: DefinitionHash,
}

// ---------------------------------------------------------------------------
// LoopRecord
// ---------------------------------------------------------------------------

/// One snapshot with its label and definition hash. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRecord {
    pub comment: String,
    pub definition_hash: DefinitionHash,
    pub payload: Vec<u8>,
}

impl LoopRecord {
    pub fn new(
        comment: impl Into<String>,
        definition_hash: DefinitionHash,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            comment: comment.into(),
            definition_hash,
            payload,
        }
    }

    /// Exact size of the encoded record.
    pub fn encoded_len(&self) -> usize {
        FRAMING_LEN + self.comment.len() + HASH_LEN + LENGTH_LEN + self.payload.len()
    }

    /// Encode with default limits.
    pub fn encode(&self) -> Result<Vec<u8>, LoopError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out, &LoopConfig::default())?;
        Ok(out)
    }

    /// Append the encoded record to `out`. Nothing is appended on error.
    pub fn encode_into(&self, out: &mut Vec<u8>, config: &LoopConfig) -> Result<(), LoopError> {
        if self.comment.len() > config.max_comment_len {
            return Err(LoopError::InvalidComment {
                reason: "longer than the configured limit",
            });
        }
        if self.comment.as_bytes().contains(&TERMINATOR) {
            return Err(LoopError::InvalidComment {
                reason: "contains a zero byte",
            });
        }
        let max = config.max_payload_len.min(i32::MAX as usize);
        if self.payload.len() > max {
            return Err(LoopError::PayloadTooLarge {
                len: self.payload.len(),
                max,
            });
        }

        out.reserve(self.encoded_len());
        out.extend_from_slice(&LOOP_MAGIC);
        out.push(SEPARATOR);
        out.extend_from_slice(self.comment.as_bytes());
        out.push(SEPARATOR);
        out.push(TERMINATOR);
        for word in self.definition_hash.words() {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&(self.payload.len() as i32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decode one record from the front of `bytes` with default limits.
    /// Returns the record and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), LoopError> {
        Self::decode_with(bytes, LoopConfig::default())
    }

    pub fn decode_with(bytes: &[u8], config: LoopConfig) -> Result<(Self, usize), LoopError> {
        let mut reader = LoopReader::with_config(bytes, config);
        match reader.next_record()? {
            Some(record) => Ok((record, reader.offset() as usize)),
            None => Err(LoopError::Truncated {
                field: "magic",
                offset: 0,
            }),
        }
    }

    /// Check the record against the current definitions.
    pub fn verify(&self, expected: DefinitionHash) -> Result<(), StaleDefinition> {
        if self.definition_hash == expected {
            Ok(())
        } else {
            Err(StaleDefinition {
                recorded: self.definition_hash,
                expected,
            })
        }
    }

    pub fn is_current(&self, expected: DefinitionHash) -> bool {
        self.definition_hash == expected
    }
}

// ---------------------------------------------------------------------------
// LoopReader
// ---------------------------------------------------------------------------

/// Where a [`LoopReader`] stands in its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Between records: the next read starts a header or ends cleanly.
    AtBoundary,
    /// Inside a record. Never observable between calls.
    MidRecord,
    /// A record was malformed. No further records are read.
    Failed,
    /// Clean end of input at a record boundary.
    Finished,
}

/// Sequential reader over a loop stream.
///
/// A malformed record is fatal for the rest of the stream: the reader does
/// not try to resynchronize on the next magic.
#[derive(Debug)]
pub struct LoopReader<R> {
    inner: BufReader<R>,
    config: LoopConfig,
    state: ReaderState,
    offset: u64,
    records_read: u64,
}

impl LoopReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoopError> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> LoopReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, LoopConfig::default())
    }

    pub fn with_config(inner: R, config: LoopConfig) -> Self {
        Self {
            inner: BufReader::new(inner),
            config,
            state: ReaderState::AtBoundary,
            offset: 0,
            records_read: 0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read the next record. `Ok(None)` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<LoopRecord>, LoopError> {
        match self.state {
            ReaderState::Finished => return Ok(None),
            ReaderState::Failed => return Err(LoopError::ReaderFailed),
            ReaderState::AtBoundary | ReaderState::MidRecord => {}
        }

        if self.inner.fill_buf()?.is_empty() {
            self.state = ReaderState::Finished;
            tracing::debug!(records = self.records_read, "loop stream finished");
            return Ok(None);
        }

        let start = self.offset;
        self.state = ReaderState::MidRecord;
        match self.read_record() {
            Ok(record) => {
                self.state = ReaderState::AtBoundary;
                self.records_read += 1;
                tracing::trace!(
                    offset = start,
                    comment = %record.comment,
                    payload = record.payload.len(),
                    "loop record read"
                );
                Ok(Some(record))
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                tracing::warn!(
                    record = self.records_read,
                    offset = start,
                    error = %e,
                    "malformed loop record, abandoning stream"
                );
                Err(e)
            }
        }
    }

    fn read_record(&mut self) -> Result<LoopRecord, LoopError> {
        let mut magic = [0u8; 4];
        self.read_field("magic", &mut magic)?;
        if magic != LOOP_MAGIC {
            return Err(LoopError::BadMagic { found: magic });
        }
        let mut sep = [0u8; 1];
        self.read_field("separator", &mut sep)?;
        if sep[0] != SEPARATOR {
            return Err(LoopError::MissingSeparator {
                after: "magic",
                found: sep[0],
            });
        }

        let comment = self.read_comment()?;

        let mut hash = [0u8; HASH_LEN];
        self.read_field("definition hash", &mut hash)?;
        let word = |i: usize| u32::from_le_bytes([hash[i], hash[i + 1], hash[i + 2], hash[i + 3]]);
        let definition_hash = DefinitionHash::new(word(0), word(4), word(8), word(12));

        let mut len = [0u8; LENGTH_LEN];
        self.read_field("payload length", &mut len)?;
        let len = i32::from_le_bytes(len);
        let len = usize::try_from(len).map_err(|_| LoopError::NegativeLength(len))?;
        let max = self.config.max_payload_len.min(i32::MAX as usize);
        if len > max {
            return Err(LoopError::PayloadTooLarge { len, max });
        }

        // Grow with the data actually present rather than trusting `len`.
        let mut payload = Vec::new();
        let got = (&mut self.inner).take(len as u64).read_to_end(&mut payload)?;
        self.offset += got as u64;
        if got < len {
            return Err(LoopError::Truncated {
                field: "payload",
                offset: self.offset,
            });
        }

        Ok(LoopRecord {
            comment,
            definition_hash,
            payload,
        })
    }

    fn read_field(&mut self, field: &'static str, buf: &mut [u8]) -> Result<(), LoopError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(LoopError::Truncated {
                field,
                offset: self.offset,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Comment bytes up to the `' ' 0x00` pair. The comment itself never
    /// contains a zero byte, so the first zero ends it.
    fn read_comment(&mut self) -> Result<String, LoopError> {
        let limit = self.config.max_comment_len + 2;
        let mut buf = Vec::new();
        (&mut self.inner)
            .take(limit as u64)
            .read_until(TERMINATOR, &mut buf)?;
        self.offset += buf.len() as u64;

        if buf.last() != Some(&TERMINATOR) {
            if buf.len() >= limit {
                return Err(LoopError::CommentTooLong {
                    max: self.config.max_comment_len,
                });
            }
            return Err(LoopError::Truncated {
                field: "comment",
                offset: self.offset,
            });
        }
        buf.pop();
        match buf.pop() {
            Some(SEPARATOR) => {}
            found => {
                return Err(LoopError::MissingSeparator {
                    after: "comment",
                    found: found.unwrap_or(TERMINATOR),
                });
            }
        }
        String::from_utf8(buf).map_err(|_| LoopError::InvalidUtf8)
    }
}

impl<R: Read> Iterator for LoopReader<R> {
    type Item = Result<LoopRecord, LoopError>;

    /// Yields each record, then at most one error, then `None`.
    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ReaderState::Failed | ReaderState::Finished => None,
            ReaderState::AtBoundary | ReaderState::MidRecord => self.next_record().transpose(),
        }
    }
}

/// Read every record of a loop file.
pub fn read_loop_file(path: impl AsRef<Path>) -> Result<Vec<LoopRecord>, LoopError> {
    LoopReader::open(path)?.collect()
}

// ---------------------------------------------------------------------------
// LoopWriter
// ---------------------------------------------------------------------------

/// Sequential appender. Each record is encoded completely in memory and
/// handed to the sink in one `write_all`.
#[derive(Debug)]
pub struct LoopWriter<W: Write> {
    inner: W,
    config: LoopConfig,
    scratch: Vec<u8>,
    records_written: u64,
}

impl LoopWriter<BufWriter<File>> {
    /// Create (or truncate) a loop file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LoopError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }

    /// Open a loop file for appending, creating it if missing.
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self, LoopError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> LoopWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, LoopConfig::default())
    }

    pub fn with_config(inner: W, config: LoopConfig) -> Self {
        Self {
            inner,
            config,
            scratch: Vec::new(),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn append(&mut self, record: &LoopRecord) -> Result<(), LoopError> {
        self.scratch.clear();
        record.encode_into(&mut self.scratch, &self.config)?;
        self.inner.write_all(&self.scratch)?;
        self.records_written += 1;
        tracing::debug!(
            comment = %record.comment,
            hash = %record.definition_hash,
            bytes = self.scratch.len(),
            "loop record appended"
        );
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LoopError> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and return the underlying sink.
    pub fn into_inner(mut self) -> Result<W, LoopError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
