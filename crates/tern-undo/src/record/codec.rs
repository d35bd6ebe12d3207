//! Packing and unpacking of undo records.
//!
//! The packed form is a 20-byte header followed by the optional sections
//! gated by the flag byte, in fixed order: relation details, block,
//! transaction, payload sizes, payload bytes, tuple bytes.  All integers
//! are little-endian and nothing is padded or aligned; a record may begin
//! at any byte of a page and straddle onto later pages.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use tern_common::constants::UNDO_RECORD_HEADER_SIZE;
use tern_common::types::{CommandId, RelFileId, TxnId, UndoRecPtr, XidEpoch};

use crate::error::{UndoError, UndoResult};

use super::types::{
    BlockDetails, ForkNumber, InfoFlags, RecordType, RelationDetails, TransactionDetails,
};

const RELATION_DETAILS_SIZE: usize = 4 + 1;
const BLOCK_DETAILS_SIZE: usize = 8 + 4 + 2;
const TRANSACTION_SIZE: usize = 4 + 8;
const PAYLOAD_SIZES_SIZE: usize = 2 + 2;

/// The in-memory form of an undo record.
///
/// Optional sections are plain `Option`s; the on-disk flag byte is derived
/// from them by the codec and never stored here.  The relation details
/// section should be left `None` when the relation lives in the default
/// tablespace's main fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedRecord {
    /// Record type code.
    pub rec_type: RecordType,
    /// Length in bytes of the record appended before this one in the same
    /// log, for walking backward during rollback.
    pub prevlen: u16,
    /// Relation the record pertains to.
    pub relfilenode: RelFileId,
    /// Transaction that modified the tuple version this record preserves.
    pub prev_xid: TxnId,
    /// Transaction that wrote this record.
    pub xid: TxnId,
    /// Command within `xid`.
    pub cid: CommandId,
    /// Tablespace/fork, when not the default.
    pub relation: Option<RelationDetails>,
    /// Block identity and per-block chain link.
    pub block: Option<BlockDetails>,
    /// Transaction header; present only on the first record of a
    /// transaction in a log.
    pub xact: Option<TransactionDetails>,
    /// Payload bytes.
    pub payload: Bytes,
    /// Tuple bytes.
    pub tuple: Bytes,
}

impl UnpackedRecord {
    /// Creates a minimal record with no optional sections.
    pub fn new(rec_type: RecordType, relfilenode: RelFileId, xid: TxnId) -> Self {
        Self {
            rec_type,
            prevlen: 0,
            relfilenode,
            prev_xid: TxnId::INVALID,
            xid,
            cid: CommandId::FIRST,
            relation: None,
            block: None,
            xact: None,
            payload: Bytes::new(),
            tuple: Bytes::new(),
        }
    }

    /// The flag byte implied by this record's optional sections.
    pub fn info_flags(&self) -> InfoFlags {
        let mut info = InfoFlags::empty();
        if self.relation.is_some() {
            info |= InfoFlags::RELATION_DETAILS;
        }
        if self.block.is_some() {
            info |= InfoFlags::BLOCK;
        }
        if self.xact.is_some() {
            info |= InfoFlags::TRANSACTION;
        }
        if !self.payload.is_empty() || !self.tuple.is_empty() {
            info |= InfoFlags::PAYLOAD;
        }
        info
    }

    /// Number of bytes of storage required to insert this record.
    pub fn expected_size(&self) -> usize {
        let info = self.info_flags();
        let mut size = UNDO_RECORD_HEADER_SIZE;
        if info.contains(InfoFlags::RELATION_DETAILS) {
            size += RELATION_DETAILS_SIZE;
        }
        if info.contains(InfoFlags::BLOCK) {
            size += BLOCK_DETAILS_SIZE;
        }
        if info.contains(InfoFlags::TRANSACTION) {
            size += TRANSACTION_SIZE;
        }
        if info.contains(InfoFlags::PAYLOAD) {
            size += PAYLOAD_SIZES_SIZE + self.payload.len() + self.tuple.len();
        }
        size
    }

    /// The canonical packed encoding of this record.
    pub fn to_bytes(&self) -> Bytes {
        let info = self.info_flags();
        let mut buf = BytesMut::with_capacity(self.expected_size());

        buf.put_u8(self.rec_type.as_u8());
        buf.put_u8(info.bits());
        buf.put_u16_le(self.prevlen);
        buf.put_u32_le(self.relfilenode.as_u32());
        buf.put_u32_le(self.prev_xid.as_u32());
        buf.put_u32_le(self.xid.as_u32());
        buf.put_u32_le(self.cid.as_u32());

        if let Some(rel) = &self.relation {
            buf.put_u32_le(rel.tablespace.as_u32());
            buf.put_u8(rel.fork.as_u8());
        }
        if let Some(block) = &self.block {
            buf.put_u64_le(block.blkprev.as_u64());
            buf.put_u32_le(block.block);
            buf.put_u16_le(block.offset);
        }
        if let Some(xact) = &self.xact {
            buf.put_u32_le(xact.xid_epoch.as_u32());
            let next = xact.next.unwrap_or(UndoRecPtr::SPECIAL);
            buf.put_u64_le(next.as_u64());
        }
        if info.contains(InfoFlags::PAYLOAD) {
            buf.put_u16_le(self.payload.len() as u16);
            buf.put_u16_le(self.tuple.len() as u16);
            buf.extend_from_slice(&self.payload);
            buf.extend_from_slice(&self.tuple);
        }

        buf.freeze()
    }

    /// Writes as much of the packed record as fits into `page` starting at
    /// `starting_byte`, returning whether the record is now complete.
    ///
    /// `already_written` is the caller's cursor over the packed bytes: pass
    /// zero on the first call and the accumulated value on continuation
    /// calls, with `starting_byte` set to the block header size (the record
    /// resumes immediately after the next page's header).
    pub fn insert_into_page(
        &self,
        page: &mut [u8],
        starting_byte: usize,
        already_written: &mut usize,
    ) -> bool {
        let packed = self.to_bytes();
        assert!(starting_byte <= page.len(), "starting byte beyond page");
        assert!(
            *already_written <= packed.len(),
            "write cursor beyond record"
        );

        let remaining = &packed[*already_written..];
        let space = page.len() - starting_byte;
        let n = remaining.len().min(space);
        page[starting_byte..starting_byte + n].copy_from_slice(&remaining[..n]);
        *already_written += n;

        *already_written == packed.len()
    }
}

/// Streaming decoder for packed undo records.
///
/// Feed successive `(page, starting_byte)` chunks to [`unpack`]; it
/// consumes exactly the record's bytes and no more, growing its notion of
/// the record's total length as the header, section lengths, and payload
/// sizes become visible.  Call [`finish`] once `unpack` reports completion.
///
/// [`unpack`]: RecordUnpacker::unpack
/// [`finish`]: RecordUnpacker::finish
#[derive(Debug, Default)]
pub struct RecordUnpacker {
    buf: Vec<u8>,
}

enum Requirement {
    /// The record is known to span exactly this many bytes, all buffered.
    Complete(usize),
    /// At least this many bytes are needed before decoding can continue.
    More(usize),
}

impl RecordUnpacker {
    /// Creates a decoder with no bytes consumed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of record bytes decoded so far.
    pub fn bytes_decoded(&self) -> usize {
        self.buf.len()
    }

    /// Consumes record bytes from `page` beginning at `starting_byte`.
    ///
    /// Returns `Ok(true)` once the whole record has been buffered; returns
    /// `Ok(false)` if the record continues on the next page, in which case
    /// the next call should pass `starting_byte` as the block header size.
    pub fn unpack(&mut self, page: &[u8], starting_byte: usize) -> UndoResult<bool> {
        assert!(starting_byte <= page.len(), "starting byte beyond page");
        let mut avail = &page[starting_byte..];

        loop {
            match self.requirement()? {
                Requirement::Complete(_) => return Ok(true),
                Requirement::More(target) => {
                    if avail.is_empty() {
                        return Ok(false);
                    }
                    let want = target - self.buf.len();
                    let take = want.min(avail.len());
                    self.buf.extend_from_slice(&avail[..take]);
                    avail = &avail[take..];
                }
            }
        }
    }

    /// Decodes the buffered bytes into an [`UnpackedRecord`].
    pub fn finish(self) -> UndoResult<UnpackedRecord> {
        let total = match self.requirement()? {
            Requirement::Complete(total) => total,
            Requirement::More(_) => {
                return Err(UndoError::corrupt_record(
                    "undo record decode finished before the record was complete",
                ))
            }
        };

        let mut buf = &self.buf[..total];

        let rec_type = RecordType::from_u8(buf.get_u8())?;
        let info = InfoFlags::from_bits(buf.get_u8())
            .ok_or_else(|| UndoError::corrupt_record("unknown undo record flag bits"))?;
        let prevlen = buf.get_u16_le();
        let relfilenode = RelFileId::new(buf.get_u32_le());
        let prev_xid = TxnId::new(buf.get_u32_le());
        let xid = TxnId::new(buf.get_u32_le());
        let cid = CommandId::new(buf.get_u32_le());

        let relation = if info.contains(InfoFlags::RELATION_DETAILS) {
            let tablespace = tern_common::types::TablespaceId::new(buf.get_u32_le());
            let fork = ForkNumber::from_u8(buf.get_u8())?;
            Some(RelationDetails { tablespace, fork })
        } else {
            None
        };

        let block = if info.contains(InfoFlags::BLOCK) {
            let blkprev = UndoRecPtr::from_u64(buf.get_u64_le());
            let block = buf.get_u32_le();
            let offset = buf.get_u16_le();
            Some(BlockDetails {
                blkprev,
                block,
                offset,
            })
        } else {
            None
        };

        let xact = if info.contains(InfoFlags::TRANSACTION) {
            let xid_epoch = XidEpoch::new(buf.get_u32_le());
            let raw = UndoRecPtr::from_u64(buf.get_u64_le());
            let next = if raw.is_special() { None } else { Some(raw) };
            Some(TransactionDetails { xid_epoch, next })
        } else {
            None
        };

        let (payload, tuple) = if info.contains(InfoFlags::PAYLOAD) {
            let payload_len = buf.get_u16_le() as usize;
            let tuple_len = buf.get_u16_le() as usize;
            let payload = Bytes::copy_from_slice(&buf[..payload_len]);
            buf.advance(payload_len);
            let tuple = Bytes::copy_from_slice(&buf[..tuple_len]);
            buf.advance(tuple_len);
            (payload, tuple)
        } else {
            (Bytes::new(), Bytes::new())
        };

        Ok(UnpackedRecord {
            rec_type,
            prevlen,
            relfilenode,
            prev_xid,
            xid,
            cid,
            relation,
            block,
            xact,
            payload,
            tuple,
        })
    }

    /// Computes how many bytes the record is known to need given what has
    /// been buffered so far, validating the header on the way.
    fn requirement(&self) -> UndoResult<Requirement> {
        if self.buf.len() < UNDO_RECORD_HEADER_SIZE {
            return Ok(Requirement::More(UNDO_RECORD_HEADER_SIZE));
        }

        RecordType::from_u8(self.buf[0])?;
        let info = InfoFlags::from_bits(self.buf[1])
            .ok_or_else(|| UndoError::corrupt_record("unknown undo record flag bits"))?;

        let mut fixed = UNDO_RECORD_HEADER_SIZE;
        if info.contains(InfoFlags::RELATION_DETAILS) {
            fixed += RELATION_DETAILS_SIZE;
        }
        if info.contains(InfoFlags::BLOCK) {
            fixed += BLOCK_DETAILS_SIZE;
        }
        if info.contains(InfoFlags::TRANSACTION) {
            fixed += TRANSACTION_SIZE;
        }

        if !info.contains(InfoFlags::PAYLOAD) {
            return if self.buf.len() < fixed {
                Ok(Requirement::More(fixed))
            } else {
                Ok(Requirement::Complete(fixed))
            };
        }

        let sizes_at = fixed;
        fixed += PAYLOAD_SIZES_SIZE;
        if self.buf.len() < fixed {
            return Ok(Requirement::More(fixed));
        }

        let payload_len =
            u16::from_le_bytes([self.buf[sizes_at], self.buf[sizes_at + 1]]) as usize;
        let tuple_len =
            u16::from_le_bytes([self.buf[sizes_at + 2], self.buf[sizes_at + 3]]) as usize;
        let total = fixed + payload_len + tuple_len;

        if self.buf.len() < total {
            Ok(Requirement::More(total))
        } else {
            Ok(Requirement::Complete(total))
        }
    }
}
