//! Undo engine configuration.

use std::path::PathBuf;

use tern_common::constants::{MAX_UNDO_RECORD_SIZE, UNDO_LOG_MAX_SIZE, UNDO_SEGMENT_SIZE};
use tern_common::types::{LogNumber, Lsn, TablespaceId};

/// Configuration for the undo log engine.
///
/// Segment and log sizes are configurable so tests can exercise extension,
/// exhaustion, and discard behavior with tiny files; production deployments
/// keep the defaults.
#[derive(Debug, Clone)]
pub struct UndoConfig {
    /// Directory holding undo data: segment files under per-tablespace
    /// subdirectories, checkpoint files under `checkpoints/`.
    pub dir: PathBuf,

    /// Size of each undo segment file in bytes.
    pub segment_size: u64,

    /// Maximum amount of data one undo log can hold.  A log whose insert
    /// pointer reaches this value is exhausted and replaced by a successor.
    pub max_log_size: u64,

    /// Maximum size of a single undo record.
    pub max_record_size: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/undo"),
            segment_size: UNDO_SEGMENT_SIZE,
            max_log_size: UNDO_LOG_MAX_SIZE,
            max_record_size: MAX_UNDO_RECORD_SIZE,
        }
    }
}

impl UndoConfig {
    /// Creates a new configuration rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the segment file size.
    #[must_use]
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the per-log size ceiling.
    #[must_use]
    pub fn with_max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_size == 0 {
            return Err("segment size must be positive".to_string());
        }

        if self.max_log_size % self.segment_size != 0 {
            return Err("max log size must be a multiple of the segment size".to_string());
        }

        if self.max_record_size == 0 {
            return Err("max record size must be positive".to_string());
        }

        // Record lengths travel in 16-bit prevlen fields.
        if self.max_record_size > MAX_UNDO_RECORD_SIZE {
            return Err(format!(
                "max record size must be at most {} bytes",
                MAX_UNDO_RECORD_SIZE
            ));
        }

        // A record must always fit in a log with room to spare for the
        // final, partially filled segment.
        if self.max_record_size as u64 >= self.max_log_size.saturating_sub(self.segment_size) {
            return Err(
                "max record size must be less than max log size minus one segment".to_string(),
            );
        }

        Ok(())
    }

    /// Returns the directory holding a tablespace's undo segment files.
    pub fn tablespace_dir(&self, tablespace: TablespaceId) -> PathBuf {
        if tablespace.is_default() {
            self.dir.join("base")
        } else {
            self.dir.join(format!("ts_{}", tablespace.as_u32()))
        }
    }

    /// Returns the segment file path for `(logno, segno, tablespace)`.
    ///
    /// Segment `segno` backs log byte range
    /// `[segno * segment_size, (segno + 1) * segment_size)`.
    pub fn segment_path(&self, logno: LogNumber, segno: u64, tablespace: TablespaceId) -> PathBuf {
        self.tablespace_dir(tablespace)
            .join(format!("{:06X}.{:010X}", logno.as_u32(), segno))
    }

    /// Returns the directory holding undo checkpoint files.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoints")
    }

    /// Returns the checkpoint file path for a redo LSN.
    ///
    /// The name is exactly 16 uppercase hex digits, so lexicographic
    /// filename order equals LSN order.
    pub fn checkpoint_path(&self, redo: Lsn) -> PathBuf {
        self.checkpoint_dir().join(format!("{:016X}", redo.as_u64()))
    }

    /// Returns the segment number covering a log byte offset.
    pub fn segment_of(&self, offset: u64) -> u64 {
        offset / self.segment_size
    }
}
