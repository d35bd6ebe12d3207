//! Undo segment file management.
//!
//! Each undo log is backed by a sequence of fixed-size segment files, the
//! unit of growth and unlink.  Creation is idempotent and durable: a crash
//! between file creation and metadata publication is repaired by the
//! create-or-open fallback on replay.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::UndoResult;

/// Zero-fill write granularity for new segments.
const ZERO_CHUNK: usize = 64 * 1024;

/// Creates a segment file of exactly `size` zero bytes and makes it
/// durable, fsyncing the file and then its parent directory.
///
/// If the file already exists (a crash landed between creation and the
/// metadata update, or replay is re-running), it is reused as is: segments
/// are zero-filled at creation and only ever overwritten by record bytes,
/// so an existing file of the right length is already in a valid state.
pub(crate) fn create_segment(path: &Path, size: u64) -> UndoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let chunk = vec![0u8; ZERO_CHUNK];
            let mut remaining = size;
            while remaining > 0 {
                let n = remaining.min(ZERO_CHUNK as u64) as usize;
                file.write_all(&chunk[..n])?;
                remaining -= n as u64;
            }
            debug!(path = %path.display(), size, "created undo segment");
            file
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() < size {
                file.set_len(size)?;
            }
            file
        }
        Err(err) => return Err(err.into()),
    };

    file.sync_all()?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Removes a segment file, tolerating a missing file so replay of a
/// discard is idempotent.
pub(crate) fn unlink_segment(path: &Path) -> UndoResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "unlinked undo segment");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Writes `data` into a segment file at `offset` within the file.
pub(crate) fn write_at(path: &Path, offset: u64, data: &[u8]) -> UndoResult<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

/// Reads exactly `buf.len()` bytes from a segment file at `offset`.
pub(crate) fn read_at(path: &Path, offset: u64, buf: &mut [u8]) -> UndoResult<()> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

/// Fsyncs a segment file.
pub(crate) fn sync_segment(path: &Path) -> UndoResult<()> {
    let file = File::open(path)?;
    file.sync_all()?;
    Ok(())
}

/// Fsyncs a directory so a preceding create or unlink survives a crash.
pub(crate) fn fsync_dir(dir: &Path) -> UndoResult<()> {
    let handle = File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}
