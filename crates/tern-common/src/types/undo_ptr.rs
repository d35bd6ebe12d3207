//! The packed undo record pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{UNDO_BLOCK_SIZE, UNDO_LOG_OFFSET_BITS};

use super::ids::LogNumber;

/// Address of a byte within an undo log: the upper 24 bits carry the log
/// number, the lower 40 bits the byte offset within that log.
///
/// Two sentinel encodings exist: zero is *invalid* (no address), and
/// all-ones is *special*, used only in serialized transaction headers to
/// mean "next-transaction start not yet known".  In-memory APIs represent
/// the latter as `Option<UndoRecPtr>` and keep the sentinel confined to the
/// on-disk form.
///
/// # Example
///
/// ```rust
/// use tern_common::types::{LogNumber, UndoRecPtr};
///
/// let ptr = UndoRecPtr::new(LogNumber::new(3), 4096);
/// assert_eq!(ptr.log_number(), LogNumber::new(3));
/// assert_eq!(ptr.offset(), 4096);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UndoRecPtr(u64);

impl UndoRecPtr {
    /// Invalid undo record pointer.
    pub const INVALID: Self = Self(0);

    /// Serialized sentinel meaning "not yet known"; only valid on disk.
    pub const SPECIAL: Self = Self(u64::MAX);

    /// Packs a log number and byte offset into a pointer.
    ///
    /// The offset must fit in 40 bits and the log number in 24.
    #[inline]
    #[must_use]
    pub const fn new(logno: LogNumber, offset: u64) -> Self {
        Self(((logno.as_u32() as u64) << UNDO_LOG_OFFSET_BITS) | offset)
    }

    /// Creates a pointer from its raw u64 representation.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw u64 representation.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Extracts the log number.
    #[inline]
    #[must_use]
    pub const fn log_number(self) -> LogNumber {
        LogNumber::new((self.0 >> UNDO_LOG_OFFSET_BITS) as u32)
    }

    /// Extracts the byte offset within the log.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 & ((1u64 << UNDO_LOG_OFFSET_BITS) - 1)
    }

    /// True iff this pointer is neither the invalid nor the special
    /// sentinel.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0 && self.0 != Self::SPECIAL.0
    }

    /// True iff this is the serialized "not yet known" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_special(self) -> bool {
        self.0 == Self::SPECIAL.0
    }

    /// The block within the log that holds this address.
    #[inline]
    #[must_use]
    pub const fn block_number(self) -> u64 {
        self.offset() / UNDO_BLOCK_SIZE as u64
    }

    /// The byte position of this address within its block.
    #[inline]
    #[must_use]
    pub const fn byte_in_block(self) -> usize {
        (self.offset() % UNDO_BLOCK_SIZE as u64) as usize
    }

    /// Returns a pointer to `delta` bytes further into the same log.
    #[inline]
    #[must_use]
    pub const fn advanced(self, delta: u64) -> Self {
        Self::new(self.log_number(), self.offset() + delta)
    }
}

impl fmt::Debug for UndoRecPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "UndoRecPtr(INVALID)")
        } else if self.is_special() {
            write!(f, "UndoRecPtr(SPECIAL)")
        } else {
            write!(
                f,
                "UndoRecPtr({}:{})",
                self.log_number().as_u32(),
                self.offset()
            )
        }
    }
}

impl fmt::Display for UndoRecPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for UndoRecPtr {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_u64(raw)
    }
}

impl From<UndoRecPtr> for u64 {
    #[inline]
    fn from(ptr: UndoRecPtr) -> Self {
        ptr.0
    }
}
