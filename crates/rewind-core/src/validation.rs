//! Desync debugging: payload comparison and determinism checks.
//!
//! Two peers that simulate the same inputs must produce byte-identical
//! snapshots. When they do not, [`diff_payloads`] locates the first
//! divergent byte, and [`validate_determinism`] checks that a value's
//! encoding is canonical (serialize, restore, serialize again).

use crate::loop_record::LoopRecord;
use crate::registry::Registry;
use crate::serialize::{WalkError, restore, snapshot};

// ---------------------------------------------------------------------------
// Payload diff
// ---------------------------------------------------------------------------

/// Where two byte buffers diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadDiff {
    /// Offset of the first differing byte. A length difference with a common
    /// prefix diverges at the shorter length.
    pub first_divergence: Option<usize>,
    pub len_a: usize,
    pub len_b: usize,
}

impl PayloadDiff {
    pub fn is_identical(&self) -> bool {
        self.first_divergence.is_none()
    }
}

pub fn diff_payloads(a: &[u8], b: &[u8]) -> PayloadDiff {
    let first_divergence = a
        .iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())));
    PayloadDiff {
        first_divergence,
        len_a: a.len(),
        len_b: b.len(),
    }
}

/// Field-by-field comparison of two loop records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDiff {
    pub comment_matches: bool,
    pub hash_matches: bool,
    pub payload: PayloadDiff,
}

impl RecordDiff {
    pub fn is_identical(&self) -> bool {
        self.comment_matches && self.hash_matches && self.payload.is_identical()
    }
}

pub fn diff_records(a: &LoopRecord, b: &LoopRecord) -> RecordDiff {
    RecordDiff {
        comment_matches: a.comment == b.comment,
        hash_matches: a.definition_hash == b.definition_hash,
        payload: diff_payloads(&a.payload, &b.payload),
    }
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

/// Result of a determinism validation run.
#[derive(Debug)]
pub struct DeterminismResult {
    /// Whether every pass produced identical bytes.
    pub is_deterministic: bool,
    /// Two independent serializations of the original value.
    pub repeat: PayloadDiff,
    /// Original encoding against the re-encoding of the restored value.
    pub round_trip: PayloadDiff,
    /// The original encoding.
    pub payload: Vec<u8>,
}

/// Serialize `root` twice, restore it, and serialize the restored value.
/// All three encodings must be byte-identical.
pub fn validate_determinism<T: 'static>(
    registry: &Registry,
    root: &T,
) -> Result<DeterminismResult, WalkError> {
    let first = snapshot(registry, root)?;
    let second = snapshot(registry, root)?;
    let restored: T = restore(registry, &first)?;
    let third = snapshot(registry, &restored)?;

    let repeat = diff_payloads(&first, &second);
    let round_trip = diff_payloads(&first, &third);
    let is_deterministic = repeat.is_identical() && round_trip.is_identical();
    if !is_deterministic {
        tracing::warn!(
            root = std::any::type_name::<T>(),
            repeat = ?repeat.first_divergence,
            round_trip = ?round_trip.first_divergence,
            "nondeterministic encoding"
        );
    }

    Ok(DeterminismResult {
        is_deterministic,
        repeat,
        round_trip,
        payload: first,
    })
}

/// Check a stored record's payload against a fresh snapshot of `root`.
pub fn validate_record<T: 'static>(
    registry: &Registry,
    record: &LoopRecord,
    root: &T,
) -> Result<RecordDiff, WalkError> {
    let fresh = LoopRecord::new(
        record.comment.clone(),
        registry.definition_hash(),
        snapshot(registry, root)?,
    );
    Ok(diff_records(record, &fresh))
}

// ===========================================================================
// Tests
// ===========================================================================
