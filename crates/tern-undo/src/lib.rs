//! # tern-undo
//!
//! TernDB's undo log engine: a durable, append-only per-transaction log of
//! pre-images and compensating records, used to roll back aborted work and
//! to reconstruct prior row versions for visibility checks.
//!
//! The crate owns three tightly coupled subsystems:
//! - the **log manager** ([`UndoLogManager`]): assigns undo logs to
//!   writers, grows and recycles backing segment files, tracks head/tail
//!   offsets;
//! - the **record codec** ([`record`]): the packed variable-layout on-disk
//!   record format, including page-straddling serialization;
//! - the **checkpoint/recovery coordinator**: persists per-log metadata to
//!   checkpoint files and re-derives state from a base checkpoint plus
//!   redo of WAL records.
//!
//! The write-ahead log itself, the buffer cache, and the transaction
//! manager are external collaborators; the engine consumes them through
//! the [`wal::RedoLog`] trait and pointer-based page addressing.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

/// Record fetch and backward chain traversal
pub mod fetch;

/// Log manager and writer sessions
pub mod manager;

/// Per-log metadata and slot states
pub mod meta;

/// Undo record codec
pub mod record;

/// WAL record schema and redo interface
pub mod wal;

mod checkpoint;
mod segment;

pub use config::UndoConfig;
pub use error::{UndoError, UndoResult};
pub use manager::{UndoLogManager, UndoWriter};
pub use meta::{Persistence, UndoLogMeta};
pub use record::{RecordType, UnpackedRecord};
