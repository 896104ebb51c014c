use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Error taxonomy for the ledger engine. All variants are fail-fast; the
/// only tolerated anomalies (unaligned chain tail, artifact version ahead of
/// current) are logged warnings, not errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Missing or malformed magic/version in an artifact file.
    #[error("bad header in {path}: {reason}")]
    BadHeader { path: PathBuf, reason: String },

    /// A recomputed hash differs from a persisted one. Signals tampering
    /// with the log or a grammar/salt change since the artifact was written.
    #[error("hash conflict at row {row}: {detail}")]
    HashConflict { row: u64, detail: String },

    /// A recomputed row offset differs from the indexed offset.
    #[error("offset index mismatch at index {index}: stored {stored}, computed {computed}")]
    AlfMismatch {
        index: u64,
        stored: u64,
        computed: u64,
    },

    /// A line exceeded the parser's buffer cap.
    #[error("line {line_no} starting at offset {offset} exceeds the {max}-byte line cap")]
    LineTooLong { line_no: u64, offset: u64, max: usize },

    /// Row-number gap or out-of-order rows reached the hasher or a writer.
    /// Indicates a bug in orchestration, not in the log.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A row number or offset fell outside its valid range.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// Underlying read/write failure. Wrapped and surfaced; no retry here.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A delimiter or comment-prefix set failed the validation probe.
    #[error("invalid grammar: {0}")]
    GrammarInvalid(String),
}

impl LedgerError {
    /// Shorthand for the orchestration-bug variant.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        LedgerError::InvalidState(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        LedgerError::IndexOutOfRange(msg.into())
    }
}
