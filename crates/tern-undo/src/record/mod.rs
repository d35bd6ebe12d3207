//! Undo record codec.
//!
//! An undo record is a fixed header followed by optional sections selected
//! by a flag byte, packed without padding and at arbitrary byte alignment
//! within a page.  [`UnpackedRecord`] is the plain in-memory form;
//! [`codec`] converts between it and the packed byte stream, including
//! records that straddle page boundaries.

pub mod codec;
pub mod types;

pub use codec::{RecordUnpacker, UnpackedRecord};
pub use types::{BlockDetails, ForkNumber, InfoFlags, RecordType, RelationDetails, TransactionDetails};
