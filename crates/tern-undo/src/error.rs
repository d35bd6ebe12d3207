//! Undo engine error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use tern_common::types::{LogNumber, UndoRecPtr};

/// Result type for undo operations.
pub type UndoResult<T> = Result<T, UndoError>;

/// Errors that can occur during undo log operations.
///
/// Invariant violations (e.g. advancing a log with a stale insertion
/// pointer) are programmer errors and assert-fatal rather than values of
/// this type.
#[derive(Debug, Error)]
pub enum UndoError {
    /// I/O error touching a segment or checkpoint file.
    #[error("undo I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A successor log could not be created: no free control slot or the
    /// filesystem is out of space.
    #[error("undo resources exhausted: {reason}")]
    ResourceExhausted {
        /// Why the allocation failed.
        reason: String,
    },

    /// Record larger than the configured ceiling.
    #[error("undo record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Requested record size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A decoded record header is inconsistent: unknown type code, unknown
    /// flag bits, or sections overrunning the record.
    #[error("corrupt undo record: {reason}")]
    CorruptRecord {
        /// What was wrong with the record.
        reason: String,
    },

    /// A checkpoint file failed validation.
    #[error("corrupt undo checkpoint {path}: {reason}")]
    CorruptCheckpoint {
        /// Path of the offending file.
        path: PathBuf,
        /// What was wrong with the file.
        reason: String,
    },

    /// A metadata query named a log this engine does not know.
    #[error("undo log {logno} not found")]
    LogNotFound {
        /// The unknown log number.
        logno: LogNumber,
    },

    /// A pointer addressed bytes outside the readable range of its log.
    #[error("invalid undo record pointer {ptr}")]
    InvalidPointer {
        /// The offending pointer.
        ptr: UndoRecPtr,
    },

    /// Recovery could not re-derive state from the WAL stream.
    #[error("undo recovery failed: {reason}")]
    Recovery {
        /// Why replay cannot proceed.
        reason: String,
    },

    /// Configuration error.
    #[error("undo configuration error: {reason}")]
    Config {
        /// What was wrong with the configuration.
        reason: String,
    },
}

impl UndoError {
    /// Creates a resource-exhausted error.
    pub fn resource_exhausted(reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            reason: reason.into(),
        }
    }

    /// Creates a corrupt-record error.
    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            reason: reason.into(),
        }
    }

    /// Creates a corrupt-checkpoint error.
    pub fn corrupt_checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a recovery error.
    pub fn recovery(reason: impl Into<String>) -> Self {
        Self::Recovery {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::CorruptCheckpoint { .. }
        )
    }
}
