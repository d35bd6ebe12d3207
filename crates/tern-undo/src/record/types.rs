//! Undo record types, flags, and optional sections.

use tern_common::types::{TablespaceId, UndoRecPtr, XidEpoch};

use crate::error::{UndoError, UndoResult};

/// Undo record type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Row insertion.
    Insert = 1,
    /// Batched row insertion.
    MultiInsert = 2,
    /// Row deletion.
    Delete = 3,
    /// Update that did not move the row.
    InplaceUpdate = 4,
    /// Update that moved the row.
    Update = 5,
    /// Lock taken without modifying the row.
    XidLockOnly = 6,
    /// Transaction slot invalidation marker.
    InvalidXactSlot = 7,
}

impl RecordType {
    /// Converts the record type to its on-disk code.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a record type from its on-disk code.
    pub fn from_u8(value: u8) -> UndoResult<Self> {
        match value {
            1 => Ok(Self::Insert),
            2 => Ok(Self::MultiInsert),
            3 => Ok(Self::Delete),
            4 => Ok(Self::InplaceUpdate),
            5 => Ok(Self::Update),
            6 => Ok(Self::XidLockOnly),
            7 => Ok(Self::InvalidXactSlot),
            _ => Err(UndoError::corrupt_record(format!(
                "unknown undo record type: {}",
                value
            ))),
        }
    }
}

bitflags::bitflags! {
    /// Optional-section gate bits of an undo record.
    ///
    /// On disk the gated sections appear in the fixed order: relation
    /// details, block, transaction, payload sizes, payload bytes, tuple
    /// bytes.  The flag byte is derived from which sections an
    /// [`super::UnpackedRecord`] carries and exists only at the codec
    /// boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InfoFlags: u8 {
        /// A [`RelationDetails`] section follows the header.
        const RELATION_DETAILS = 0x01;
        /// A [`BlockDetails`] section follows.
        const BLOCK = 0x02;
        /// Payload/tuple length fields and their bytes follow.
        const PAYLOAD = 0x04;
        /// A [`TransactionDetails`] section follows.
        const TRANSACTION = 0x08;
    }
}

/// Fork of a relation an undo record pertains to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ForkNumber {
    /// Main data fork.
    #[default]
    Main = 0,
    /// Free space map fork.
    FreeSpaceMap = 1,
    /// Visibility map fork.
    VisibilityMap = 2,
    /// Unlogged-relation init fork.
    Init = 3,
}

impl ForkNumber {
    /// Converts the fork number to its on-disk code.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a fork number from its on-disk code.
    pub fn from_u8(value: u8) -> UndoResult<Self> {
        match value {
            0 => Ok(Self::Main),
            1 => Ok(Self::FreeSpaceMap),
            2 => Ok(Self::VisibilityMap),
            3 => Ok(Self::Init),
            _ => Err(UndoError::corrupt_record(format!(
                "unknown fork number: {}",
                value
            ))),
        }
    }
}

/// Tablespace and fork of the relation, present only when either differs
/// from the default (default tablespace, main fork).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDetails {
    /// Tablespace holding the relation.
    pub tablespace: TablespaceId,
    /// Relation fork.
    pub fork: ForkNumber,
}

/// Identity of the block this record pertains to, and the backward link of
/// the per-block undo chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDetails {
    /// Address of the previous undo record for the same block, or
    /// [`UndoRecPtr::INVALID`] at the chain end.
    pub blkprev: UndoRecPtr,
    /// Block number within the relation fork.
    pub block: u32,
    /// Item offset within the block.
    pub offset: u16,
}

/// Transaction header, present only on the first record a transaction
/// writes into a log.
///
/// Absence of this section marks a record as a continuation of the
/// transaction already writing to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDetails {
    /// Epoch of the inserting transaction.
    pub xid_epoch: XidEpoch,
    /// Start of the next transaction's undo in this log; `None` until the
    /// next transaction begins (serialized as the all-ones sentinel).
    pub next: Option<UndoRecPtr>,
}
