//! Core type definitions for TernDB.

mod ids;
mod undo_ptr;

pub use ids::{CommandId, LogNumber, Lsn, RelFileId, TablespaceId, TxnId, XidEpoch};
pub use undo_ptr::UndoRecPtr;
