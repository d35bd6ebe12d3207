//! System-wide constants for TernDB's undo subsystem.

// =============================================================================
// Undo Log Addressing
// =============================================================================

/// Width of an undo log number in bits.  24 allows for 16.7M logs.
pub const UNDO_LOG_NUMBER_BITS: u32 = 24;

/// Width of an undo log offset in bits.  40 allows for 1 TiB per log.
pub const UNDO_LOG_OFFSET_BITS: u32 = 64 - UNDO_LOG_NUMBER_BITS;

/// Maximum amount of data that can be stored in one undo log.
///
/// The runtime limit lives in `UndoConfig` and can be set artificially low
/// to exercise full-log behavior in tests; this is the addressing ceiling.
pub const UNDO_LOG_MAX_SIZE: u64 = 1 << UNDO_LOG_OFFSET_BITS;

// =============================================================================
// Block and Segment Geometry
// =============================================================================

/// Size of one undo block in bytes (8 KB).
pub const UNDO_BLOCK_SIZE: usize = 8 * 1024;

/// Number of blocks in an undo segment file.  512 = 4 MiB.
pub const UNDO_SEGMENT_BLOCKS: usize = 512;

/// Size of an undo segment file in bytes.
pub const UNDO_SEGMENT_SIZE: u64 = (UNDO_BLOCK_SIZE * UNDO_SEGMENT_BLOCKS) as u64;

/// Bytes consumed by the buffer cache's page header at the start of each
/// block.  Opaque to the undo engine; the record codec resumes straddled
/// records immediately after it.
pub const UNDO_BLOCK_HEADER_SIZE: usize = 24;

/// Bytes of record data that fit in one block behind the page header.
pub const UNDO_USABLE_BYTES_PER_BLOCK: usize = UNDO_BLOCK_SIZE - UNDO_BLOCK_HEADER_SIZE;

// =============================================================================
// Record Limits
// =============================================================================

/// Fixed undo record header size: type (1) + info (1) + prevlen (2) +
/// relfilenode (4) + prevxid (4) + xid (4) + cid (4).
pub const UNDO_RECORD_HEADER_SIZE: usize = 20;

/// Largest undo record: record lengths (`prevlen`) are 16-bit on disk, so
/// a record can never exceed this many bytes in total.
pub const MAX_UNDO_RECORD_SIZE: usize = u16::MAX as usize;

// =============================================================================
// Checkpoint Files
// =============================================================================

/// Length of an undo checkpoint file name: 16 uppercase hex digits encoding
/// the redo LSN.  Lexicographic order over these names equals LSN order.
pub const UNDO_CHECKPOINT_FILENAME_LEN: usize = 16;

/// Magic number for undo checkpoint file headers ("TERN" in ASCII).
pub const UNDO_CHECKPOINT_MAGIC: u32 = 0x5445_524E;

/// Version number of the undo checkpoint file format.
pub const UNDO_CHECKPOINT_VERSION: u32 = 1;

// =============================================================================
// Namespace
// =============================================================================

/// The pseudo-database OID identifying the undo namespace in buffer-cache
/// calls that need a database identifier.
pub const UNDO_DATABASE_ID: u32 = 9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressing_split() {
        assert_eq!(UNDO_LOG_NUMBER_BITS + UNDO_LOG_OFFSET_BITS, 64);
        assert_eq!(UNDO_LOG_MAX_SIZE, 1 << 40);
    }

    #[test]
    fn test_segment_geometry() {
        assert!(UNDO_BLOCK_SIZE.is_power_of_two());
        assert_eq!(UNDO_SEGMENT_SIZE, 4 * 1024 * 1024);
        assert_eq!(UNDO_SEGMENT_SIZE % UNDO_BLOCK_SIZE as u64, 0);
        assert!(UNDO_BLOCK_HEADER_SIZE < UNDO_BLOCK_SIZE);
    }

    #[test]
    fn test_record_ceiling() {
        // A maximal record must fit comfortably inside a segment.
        assert!(MAX_UNDO_RECORD_SIZE < UNDO_SEGMENT_SIZE as usize);
    }
}
