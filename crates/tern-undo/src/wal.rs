//! WAL record schema for undo log state changes, and the interface to the
//! external write-ahead log.
//!
//! Every mutation of durable per-log metadata is described by an
//! [`UndoWalRecord`] written to the WAL before the corresponding file
//! system effect is made durable.  Each record carries the *absolute*
//! post-state of the fields it touches, so replaying any suffix of the
//! stream any number of times converges to the same control-slot state.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use tern_common::types::{LogNumber, Lsn, TablespaceId, TxnId, XidEpoch};

use crate::error::{UndoError, UndoResult};
use crate::meta::Persistence;

/// A WAL record describing one undo log state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoWalRecord {
    /// A new undo log came into existence.
    CreateLog {
        /// The new log's number.
        logno: LogNumber,
        /// Its persistence level.
        persistence: Persistence,
        /// Its backing tablespace.
        tablespace: TablespaceId,
    },
    /// Segments were added to a log.
    ExtendSegments {
        /// The extended log.
        logno: LogNumber,
        /// One past the last byte of the highest segment after extension.
        new_end: u64,
    },
    /// The insertion point moved forward past an appended record.
    AdvanceInsert {
        /// The log written to.
        logno: LogNumber,
        /// Writing transaction; lets recovery rebuild the xid binding.
        xid: TxnId,
        /// Epoch of `xid`.
        xid_epoch: XidEpoch,
        /// Absolute insertion point after the append.
        insert: u64,
        /// Length of the appended record.
        prevlen: u16,
    },
    /// The previous-record length was overwritten out of line.
    SetPrevLen {
        /// The target log.
        logno: LogNumber,
        /// The new previous-record length.
        prevlen: u16,
    },
    /// The discard pointer moved forward.
    Discard {
        /// The discarded log.
        logno: LogNumber,
        /// Absolute discard pointer after the operation.
        discard: u64,
        /// Whether whole segments fell below the new discard pointer and
        /// were unlinked.
        unlink: bool,
        /// Whether the log was fully consumed and destroyed outright.
        destroyed: bool,
    },
    /// A transaction began writing into a log.
    MarkXactStart {
        /// The target log.
        logno: LogNumber,
        /// Insertion offset of the transaction's first record.
        offset: u64,
        /// The transaction.
        xid: TxnId,
        /// Epoch of `xid`.
        xid_epoch: XidEpoch,
    },
    /// An aborted writer truncated its log head back to an earlier offset.
    Rewind {
        /// The rewound log.
        logno: LogNumber,
        /// Absolute insertion point after the rewind.
        insert: u64,
        /// Previous-record length restored alongside.
        prevlen: u16,
    },
}

const KIND_CREATE_LOG: u8 = 1;
const KIND_EXTEND_SEGMENTS: u8 = 2;
const KIND_ADVANCE_INSERT: u8 = 3;
const KIND_SET_PREVLEN: u8 = 4;
const KIND_DISCARD: u8 = 5;
const KIND_MARK_XACT_START: u8 = 6;
const KIND_REWIND: u8 = 7;

impl UndoWalRecord {
    /// The log this record targets.
    pub fn logno(&self) -> LogNumber {
        match *self {
            Self::CreateLog { logno, .. }
            | Self::ExtendSegments { logno, .. }
            | Self::AdvanceInsert { logno, .. }
            | Self::SetPrevLen { logno, .. }
            | Self::Discard { logno, .. }
            | Self::MarkXactStart { logno, .. }
            | Self::Rewind { logno, .. } => logno,
        }
    }

    /// Serializes the record with a leading kind byte, little-endian.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        match *self {
            Self::CreateLog {
                logno,
                persistence,
                tablespace,
            } => {
                buf.put_u8(KIND_CREATE_LOG);
                buf.put_u32_le(logno.as_u32());
                buf.put_u8(persistence.as_u8());
                buf.put_u32_le(tablespace.as_u32());
            }
            Self::ExtendSegments { logno, new_end } => {
                buf.put_u8(KIND_EXTEND_SEGMENTS);
                buf.put_u32_le(logno.as_u32());
                buf.put_u64_le(new_end);
            }
            Self::AdvanceInsert {
                logno,
                xid,
                xid_epoch,
                insert,
                prevlen,
            } => {
                buf.put_u8(KIND_ADVANCE_INSERT);
                buf.put_u32_le(logno.as_u32());
                buf.put_u32_le(xid.as_u32());
                buf.put_u32_le(xid_epoch.as_u32());
                buf.put_u64_le(insert);
                buf.put_u16_le(prevlen);
            }
            Self::SetPrevLen { logno, prevlen } => {
                buf.put_u8(KIND_SET_PREVLEN);
                buf.put_u32_le(logno.as_u32());
                buf.put_u16_le(prevlen);
            }
            Self::Discard {
                logno,
                discard,
                unlink,
                destroyed,
            } => {
                buf.put_u8(KIND_DISCARD);
                buf.put_u32_le(logno.as_u32());
                buf.put_u64_le(discard);
                buf.put_u8(unlink as u8);
                buf.put_u8(destroyed as u8);
            }
            Self::MarkXactStart {
                logno,
                offset,
                xid,
                xid_epoch,
            } => {
                buf.put_u8(KIND_MARK_XACT_START);
                buf.put_u32_le(logno.as_u32());
                buf.put_u64_le(offset);
                buf.put_u32_le(xid.as_u32());
                buf.put_u32_le(xid_epoch.as_u32());
            }
            Self::Rewind {
                logno,
                insert,
                prevlen,
            } => {
                buf.put_u8(KIND_REWIND);
                buf.put_u32_le(logno.as_u32());
                buf.put_u64_le(insert);
                buf.put_u16_le(prevlen);
            }
        }
        buf.freeze()
    }

    /// Deserializes a record written by [`UndoWalRecord::serialize`].
    pub fn deserialize(bytes: &[u8]) -> UndoResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < 5 {
            return Err(UndoError::corrupt_record("undo WAL record too short"));
        }

        let kind = buf.get_u8();
        let logno = LogNumber::new(buf.get_u32_le());

        fn need(buf: &[u8], n: usize) -> UndoResult<()> {
            if buf.len() < n {
                Err(UndoError::corrupt_record("undo WAL record truncated"))
            } else {
                Ok(())
            }
        }

        match kind {
            KIND_CREATE_LOG => {
                need(buf, 5)?;
                let persistence = Persistence::from_u8(buf.get_u8())?;
                let tablespace = TablespaceId::new(buf.get_u32_le());
                Ok(Self::CreateLog {
                    logno,
                    persistence,
                    tablespace,
                })
            }
            KIND_EXTEND_SEGMENTS => {
                need(buf, 8)?;
                Ok(Self::ExtendSegments {
                    logno,
                    new_end: buf.get_u64_le(),
                })
            }
            KIND_ADVANCE_INSERT => {
                need(buf, 18)?;
                Ok(Self::AdvanceInsert {
                    logno,
                    xid: TxnId::new(buf.get_u32_le()),
                    xid_epoch: XidEpoch::new(buf.get_u32_le()),
                    insert: buf.get_u64_le(),
                    prevlen: buf.get_u16_le(),
                })
            }
            KIND_SET_PREVLEN => {
                need(buf, 2)?;
                Ok(Self::SetPrevLen {
                    logno,
                    prevlen: buf.get_u16_le(),
                })
            }
            KIND_DISCARD => {
                need(buf, 10)?;
                Ok(Self::Discard {
                    logno,
                    discard: buf.get_u64_le(),
                    unlink: buf.get_u8() != 0,
                    destroyed: buf.get_u8() != 0,
                })
            }
            KIND_MARK_XACT_START => {
                need(buf, 16)?;
                Ok(Self::MarkXactStart {
                    logno,
                    offset: buf.get_u64_le(),
                    xid: TxnId::new(buf.get_u32_le()),
                    xid_epoch: XidEpoch::new(buf.get_u32_le()),
                })
            }
            KIND_REWIND => {
                need(buf, 10)?;
                Ok(Self::Rewind {
                    logno,
                    insert: buf.get_u64_le(),
                    prevlen: buf.get_u16_le(),
                })
            }
            _ => Err(UndoError::corrupt_record(format!(
                "unknown undo WAL record kind: {}",
                kind
            ))),
        }
    }
}

/// The write-ahead log as consumed by the undo engine: an opaque record
/// sink and LSN source.
///
/// Implementations must make `flush(lsn)` durable before returning, since
/// the engine orders its file-system effects after the flush.
pub trait RedoLog: Send + Sync {
    /// Appends a record, returning its LSN.
    fn append(&self, record: &UndoWalRecord) -> UndoResult<Lsn>;

    /// Makes every record up to and including `lsn` durable.
    fn flush(&self, lsn: Lsn) -> UndoResult<()>;
}

/// In-memory [`RedoLog`] for tests and for replaying captured streams.
#[derive(Debug, Default)]
pub struct MemoryRedoLog {
    records: parking_lot::Mutex<Vec<UndoWalRecord>>,
}

impl MemoryRedoLog {
    /// Creates an empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every appended record, in order.
    pub fn records(&self) -> Vec<UndoWalRecord> {
        self.records.lock().clone()
    }
}

impl RedoLog for MemoryRedoLog {
    fn append(&self, record: &UndoWalRecord) -> UndoResult<Lsn> {
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(Lsn::new(records.len() as u64))
    }

    fn flush(&self, _lsn: Lsn) -> UndoResult<()> {
        Ok(())
    }
}
