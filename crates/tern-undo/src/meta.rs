//! Per-log metadata and slot lifecycle states.

use bytes::{Buf, BufMut};

use tern_common::types::{TablespaceId, TxnId, XidEpoch};

use crate::error::{UndoError, UndoResult};

/// Persistence level of an undo log.
///
/// Logs of different levels are never shared: a writer holds at most one
/// attached log per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Persistence {
    /// Crash-safe: WAL-logged and checkpointed.
    Permanent = 1,
    /// Survives clean restarts only; rebuilt empty after a crash.
    Unlogged = 2,
    /// Session-lifetime only; never checkpointed.
    Temporary = 3,
}

impl Persistence {
    /// All persistence levels, in slot-scan order.
    pub const ALL: [Persistence; 3] = [
        Persistence::Permanent,
        Persistence::Unlogged,
        Persistence::Temporary,
    ];

    /// Converts the level to its on-disk code.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a persistence level from its on-disk code.
    pub fn from_u8(value: u8) -> UndoResult<Self> {
        match value {
            1 => Ok(Self::Permanent),
            2 => Ok(Self::Unlogged),
            3 => Ok(Self::Temporary),
            _ => Err(UndoError::corrupt_record(format!(
                "unknown persistence level: {}",
                value
            ))),
        }
    }

    /// Index into per-writer attachment arrays.
    pub(crate) const fn slot_index(self) -> usize {
        self as usize - 1
    }

    /// True iff state changes to logs of this level are WAL-logged.
    pub const fn needs_wal(self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// Control metadata for one undo log.
///
/// Lives in the log's control slot and is written verbatim into checkpoint
/// files for non-temporary logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoLogMeta {
    /// Backing storage location.
    pub tablespace: TablespaceId,
    /// Persistence level.
    pub persistence: Persistence,
    /// Next free byte offset (head); monotonic while the log lives.
    pub insert: u64,
    /// One past the last byte of the highest allocated segment.
    pub end: u64,
    /// Oldest byte still needed (tail); monotonic.
    pub discard: u64,
    /// Insertion offset of the current/last transaction's first record.
    pub last_xact_start: u64,
    /// Set right after a transaction starts writing into this log, cleared
    /// once its first record has been appended.
    pub is_first_rec: bool,
    /// Transaction currently writing into this log, if any.
    pub xid: TxnId,
    /// Epoch of `xid`.
    pub xid_epoch: XidEpoch,
    /// Length of the most recently appended record.  Preserved across
    /// restarts so rollback can locate the last record of the last
    /// transaction after recovery.
    pub prevlen: u16,
}

impl UndoLogMeta {
    /// Serialized size of one metadata record in a checkpoint file.
    pub const ENCODED_SIZE: usize = 4 + 1 + 8 + 8 + 8 + 8 + 1 + 4 + 4 + 2;

    /// Creates metadata for a freshly created, empty log.
    pub fn new(tablespace: TablespaceId, persistence: Persistence) -> Self {
        Self {
            tablespace,
            persistence,
            insert: 0,
            end: 0,
            discard: 0,
            last_xact_start: 0,
            is_first_rec: false,
            xid: TxnId::INVALID,
            xid_epoch: XidEpoch::new(0),
            prevlen: 0,
        }
    }

    /// Serializes the metadata in the canonical little-endian layout.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.tablespace.as_u32());
        buf.put_u8(self.persistence.as_u8());
        buf.put_u64_le(self.insert);
        buf.put_u64_le(self.end);
        buf.put_u64_le(self.discard);
        buf.put_u64_le(self.last_xact_start);
        buf.put_u8(self.is_first_rec as u8);
        buf.put_u32_le(self.xid.as_u32());
        buf.put_u32_le(self.xid_epoch.as_u32());
        buf.put_u16_le(self.prevlen);
    }

    /// Deserializes metadata written by [`UndoLogMeta::encode`].
    pub fn decode(buf: &mut impl Buf) -> UndoResult<Self> {
        if buf.remaining() < Self::ENCODED_SIZE {
            return Err(UndoError::corrupt_record(format!(
                "undo log metadata truncated: {} < {}",
                buf.remaining(),
                Self::ENCODED_SIZE
            )));
        }

        let tablespace = TablespaceId::new(buf.get_u32_le());
        let persistence = Persistence::from_u8(buf.get_u8())?;
        let insert = buf.get_u64_le();
        let end = buf.get_u64_le();
        let discard = buf.get_u64_le();
        let last_xact_start = buf.get_u64_le();
        let is_first_rec = buf.get_u8() != 0;
        let xid = TxnId::new(buf.get_u32_le());
        let xid_epoch = XidEpoch::new(buf.get_u32_le());
        let prevlen = buf.get_u16_le();

        Ok(Self {
            tablespace,
            persistence,
            insert,
            end,
            discard,
            last_xact_start,
            is_first_rec,
            xid,
            xid_epoch,
            prevlen,
        })
    }
}

/// Lifecycle state of a log's control slot.
///
/// `Unused` is represented by absence from the slot table; the remaining
/// transitions are serialized by the slot's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No writer attached; accepting a new one.
    Idle,
    /// Owned by one writer transaction.
    Attached,
    /// `insert` reached the log size ceiling; never reopened for writes.
    Exhausted,
    /// Exhausted and fully discarded; about to be destroyed.
    FullyDiscarded,
}
