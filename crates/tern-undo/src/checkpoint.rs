//! Checkpointing and crash recovery of undo log metadata.
//!
//! A checkpoint file is the durable snapshot of every non-temporary log's
//! control metadata, named by the redo LSN it belongs to.  Startup loads
//! the newest valid file and WAL replay re-derives everything that
//! happened after it through [`UndoLogManager::redo`].

use std::sync::atomic::Ordering;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, info, warn};

use tern_common::constants::{
    UNDO_CHECKPOINT_FILENAME_LEN, UNDO_CHECKPOINT_MAGIC, UNDO_CHECKPOINT_VERSION,
};
use tern_common::types::{LogNumber, Lsn};

use crate::error::{UndoError, UndoResult};
use crate::manager::{UndoLogManager, UndoLogSlot};
use crate::meta::{Persistence, SlotState, UndoLogMeta};
use crate::segment;
use crate::wal::UndoWalRecord;

/// Fixed checkpoint file header: magic, version, next log number, entry
/// count, CRC32 of the body.
const CHECKPOINT_HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4;

impl UndoLogManager {
    // =========================================================================
    // Checkpointing
    // =========================================================================

    /// Writes a checkpoint of all non-temporary logs keyed by `redo`,
    /// then removes the checkpoint of `prior_redo`.
    ///
    /// Discard is quiesced for the duration; allocation and append
    /// continue.  The new file is fsynced, and so is its directory, before
    /// the old file is deleted, so a crash at any point leaves at least
    /// one complete checkpoint on disk.
    pub fn checkpoint(&self, redo: Lsn, prior_redo: Lsn) -> UndoResult<()> {
        let _quiesce = self.discard_quiesce.lock();

        self.flush_dirty_segments()?;

        let mut snapshots: Vec<(LogNumber, UndoLogMeta)> = {
            let slots = self.slots.read();
            slots
                .values()
                .filter_map(|slot| {
                    let inner = slot.inner.lock();
                    if inner.meta.persistence == Persistence::Temporary
                        || inner.state == SlotState::FullyDiscarded
                    {
                        None
                    } else {
                        Some((slot.logno, inner.meta.clone()))
                    }
                })
                .collect()
        };
        snapshots.sort_by_key(|(logno, _)| *logno);

        let next_logno = *self.next_logno.lock();

        let mut body = BytesMut::with_capacity(snapshots.len() * (4 + UndoLogMeta::ENCODED_SIZE));
        for (logno, meta) in &snapshots {
            body.put_u32_le(logno.as_u32());
            meta.encode(&mut body);
        }
        let crc = crc32fast::hash(&body);

        let mut file_bytes = BytesMut::with_capacity(CHECKPOINT_HEADER_SIZE + body.len());
        file_bytes.put_u32_le(UNDO_CHECKPOINT_MAGIC);
        file_bytes.put_u32_le(UNDO_CHECKPOINT_VERSION);
        file_bytes.put_u32_le(next_logno);
        file_bytes.put_u32_le(snapshots.len() as u32);
        file_bytes.put_u32_le(crc);
        file_bytes.extend_from_slice(&body);

        let dir = self.config.checkpoint_dir();
        let path = self.config.checkpoint_path(redo);
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&path)?;
            file.write_all(&file_bytes)?;
            file.sync_all()?;
        }
        segment::fsync_dir(&dir)?;

        // Only now is it safe to drop the previous checkpoint.
        if prior_redo.is_valid() && prior_redo != redo {
            let prior = self.config.checkpoint_path(prior_redo);
            match std::fs::remove_file(&prior) {
                Ok(()) => segment::fsync_dir(&dir)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        info!(redo = %redo, logs = snapshots.len(), "wrote undo checkpoint");
        Ok(())
    }

    /// Flushes every segment holding unflushed record bytes, advancing
    /// each log's highest-synced boundary so clean segments are skipped by
    /// the next incremental pass.
    fn flush_dirty_segments(&self) -> UndoResult<()> {
        let slots: Vec<std::sync::Arc<UndoLogSlot>> =
            self.slots.read().values().cloned().collect();

        for slot in slots {
            let (range, tablespace) = {
                let inner = slot.inner.lock();
                (inner.dirty_segments, inner.meta.tablespace)
            };
            let Some((low, high)) = range else { continue };

            for segno in low..=high {
                let path = self.config.segment_path(slot.logno, segno, tablespace);
                match segment::sync_segment(&path) {
                    Ok(()) => {}
                    // Discard can unlink a dirty segment before we reach it.
                    Err(UndoError::Io { source })
                        if source.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err),
                }
            }

            let mut inner = slot.inner.lock();
            inner.highest_synced_segno = Some(match inner.highest_synced_segno {
                Some(prev) => prev.max(high),
                None => high,
            });
            // Appends during the flush may have re-dirtied later segments.
            inner.dirty_segments = match inner.dirty_segments {
                Some((lo, hi)) if hi > high => Some((lo.max(high + 1), hi)),
                _ => None,
            };
            debug!(logno = slot.logno.as_u32(), low, high, "flushed undo segments");
        }

        Ok(())
    }

    /// Marks a system-wide checkpoint as in progress.
    ///
    /// While set, discard defers segment unlinks, so a crash mid
    /// checkpoint never loses a segment the checkpoint snapshot still
    /// references; clearing the flag performs the deferred unlinks.
    pub fn set_checkpoint_in_progress(&self, in_progress: bool) -> UndoResult<()> {
        self.checkpoint_in_progress
            .store(in_progress, Ordering::Release);

        if !in_progress {
            let pending: Vec<_> = std::mem::take(&mut *self.pending_unlinks.lock());
            for path in pending {
                segment::unlink_segment(&path)?;
            }
        }
        Ok(())
    }

    /// Whether a checkpoint is currently in progress.
    pub fn is_checkpoint_in_progress(&self) -> bool {
        self.checkpoint_in_progress.load(Ordering::Acquire)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Loads the checkpoint written at `redo` into fresh control slots.
    ///
    /// WAL replay must then feed every undo WAL record at or after `redo`
    /// through [`redo`](Self::redo).
    pub fn startup(&self, redo: Lsn) -> UndoResult<()> {
        let path = self.config.checkpoint_path(redo);
        let bytes = std::fs::read(&path)?;
        self.load_checkpoint_bytes(&path, &bytes)
    }

    /// Scans the checkpoint directory for the newest valid checkpoint and
    /// loads it, returning its redo LSN; `None` when no checkpoint exists
    /// (a fresh data directory).
    ///
    /// File names that do not match the fixed 16-hex-digit format are
    /// ignored; lexicographic order over valid names equals LSN order.
    pub fn startup_from_latest(&self) -> UndoResult<Option<Lsn>> {
        let dir = self.config.checkpoint_dir();
        let mut newest: Option<(String, Lsn)> = None;

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(lsn) = parse_checkpoint_name(name) else {
                warn!(name, "ignoring malformed undo checkpoint filename");
                continue;
            };
            if newest.as_ref().map_or(true, |(best, _)| name > best.as_str()) {
                newest = Some((name.to_string(), lsn));
            }
        }

        match newest {
            Some((_, lsn)) => {
                self.startup(lsn)?;
                Ok(Some(lsn))
            }
            None => Ok(None),
        }
    }

    fn load_checkpoint_bytes(&self, path: &std::path::Path, bytes: &[u8]) -> UndoResult<()> {
        if bytes.len() < CHECKPOINT_HEADER_SIZE {
            return Err(UndoError::corrupt_checkpoint(path, "file shorter than header"));
        }

        let mut buf = bytes;
        let magic = buf.get_u32_le();
        if magic != UNDO_CHECKPOINT_MAGIC {
            return Err(UndoError::corrupt_checkpoint(
                path,
                format!("bad magic {:#010x}", magic),
            ));
        }
        let version = buf.get_u32_le();
        if version != UNDO_CHECKPOINT_VERSION {
            return Err(UndoError::corrupt_checkpoint(
                path,
                format!("unsupported version {}", version),
            ));
        }
        let next_logno = buf.get_u32_le();
        let count = buf.get_u32_le() as usize;
        let crc = buf.get_u32_le();

        let body = buf;
        if body.len() != count * (4 + UndoLogMeta::ENCODED_SIZE) {
            return Err(UndoError::corrupt_checkpoint(path, "body length mismatch"));
        }
        if crc32fast::hash(body) != crc {
            return Err(UndoError::corrupt_checkpoint(path, "checksum mismatch"));
        }

        let mut buf = body;
        let mut slots = self.slots.write();
        let mut xid_logs = self.xid_logs.write();
        slots.clear();
        xid_logs.clear();

        for _ in 0..count {
            let logno = LogNumber::new(buf.get_u32_le());
            let meta = UndoLogMeta::decode(&mut buf)
                .map_err(|err| UndoError::corrupt_checkpoint(path, err.to_string()))?;

            if meta.xid.is_valid() {
                xid_logs.insert(meta.xid, logno);
            }
            let state = if meta.insert >= self.config.max_log_size {
                SlotState::Exhausted
            } else {
                SlotState::Idle
            };
            slots.insert(logno, UndoLogSlot::new(logno, meta, state));
        }

        *self.next_logno.lock() = next_logno;

        info!(logs = count, next_logno, "loaded undo checkpoint");
        Ok(())
    }

    // =========================================================================
    // Redo
    // =========================================================================

    /// Applies one undo WAL record to the control slots during replay.
    ///
    /// Every kind is idempotent: records carry absolute post-state, so
    /// replaying a prefix twice converges to the same slot state.  Errors
    /// here are fatal to recovery (crash-stop); replay must not proceed
    /// past them.
    pub fn redo(&self, record: &UndoWalRecord) -> UndoResult<()> {
        match *record {
            UndoWalRecord::CreateLog {
                logno,
                persistence,
                tablespace,
            } => {
                std::fs::create_dir_all(self.config.tablespace_dir(tablespace))?;
                let mut slots = self.slots.write();
                slots.entry(logno).or_insert_with(|| {
                    UndoLogSlot::new(
                        logno,
                        UndoLogMeta::new(tablespace, persistence),
                        SlotState::Idle,
                    )
                });
                drop(slots);

                let mut next_logno = self.next_logno.lock();
                if logno.as_u32() >= *next_logno {
                    *next_logno = logno.as_u32() + 1;
                }
            }

            UndoWalRecord::ExtendSegments { logno, new_end } => {
                let slot = self.redo_slot(logno)?;
                let seg = self.config.segment_size;
                let (old_end, tablespace) = {
                    let inner = slot.inner.lock();
                    (inner.meta.end, inner.meta.tablespace)
                };
                for segno in (old_end / seg)..(new_end / seg) {
                    let path = self.config.segment_path(logno, segno, tablespace);
                    segment::create_segment(&path, seg)?;
                }
                let mut inner = slot.inner.lock();
                if new_end > inner.meta.end {
                    inner.meta.end = new_end;
                }
            }

            UndoWalRecord::AdvanceInsert {
                logno,
                xid,
                xid_epoch,
                insert,
                prevlen,
            } => {
                let slot = self.redo_slot(logno)?;
                let mut inner = slot.inner.lock();
                inner.meta.insert = insert;
                inner.meta.prevlen = prevlen;
                inner.meta.is_first_rec = false;
                inner.meta.xid = xid;
                inner.meta.xid_epoch = xid_epoch;
                drop(inner);
                if xid.is_valid() {
                    self.xid_logs.write().insert(xid, logno);
                }
            }

            UndoWalRecord::SetPrevLen { logno, prevlen } => {
                let slot = self.redo_slot(logno)?;
                slot.inner.lock().meta.prevlen = prevlen;
            }

            UndoWalRecord::Discard {
                logno,
                discard,
                unlink,
                destroyed,
            } => {
                // A destroyed log may already be gone from an earlier pass.
                let slot = match self.slot(logno) {
                    Ok(slot) => slot,
                    Err(UndoError::LogNotFound { .. }) if destroyed => return Ok(()),
                    Err(err) => return Err(err),
                };

                let seg = self.config.segment_size;
                let (tablespace, end) = {
                    let mut inner = slot.inner.lock();
                    if discard > inner.meta.discard {
                        inner.meta.discard = discard;
                    }
                    (inner.meta.tablespace, inner.meta.end)
                };

                if unlink || destroyed {
                    let upper = if destroyed { end / seg } else { discard / seg };
                    for segno in 0..upper {
                        let path = self.config.segment_path(logno, segno, tablespace);
                        segment::unlink_segment(&path)?;
                    }
                }

                if destroyed {
                    self.slots.write().remove(&logno);
                    self.xid_logs.write().retain(|_, l| *l != logno);
                }
            }

            UndoWalRecord::MarkXactStart {
                logno,
                offset,
                xid,
                xid_epoch,
            } => {
                let slot = self.redo_slot(logno)?;
                let mut inner = slot.inner.lock();
                inner.meta.last_xact_start = offset;
                inner.meta.is_first_rec = true;
                inner.meta.xid = xid;
                inner.meta.xid_epoch = xid_epoch;
                drop(inner);
                if xid.is_valid() {
                    self.xid_logs.write().insert(xid, logno);
                }
            }

            UndoWalRecord::Rewind {
                logno,
                insert,
                prevlen,
            } => {
                let slot = self.redo_slot(logno)?;
                let mut inner = slot.inner.lock();
                inner.meta.insert = insert;
                inner.meta.prevlen = prevlen;
            }
        }

        Ok(())
    }

    /// Resolves a slot during replay; a miss means the WAL stream is
    /// inconsistent with the loaded checkpoint.
    fn redo_slot(&self, logno: LogNumber) -> UndoResult<std::sync::Arc<UndoLogSlot>> {
        self.slot(logno).map_err(|_| {
            UndoError::recovery(format!(
                "WAL names undo log {} unknown to the checkpoint",
                logno
            ))
        })
    }
}

/// Parses a checkpoint file name, requiring exactly 16 uppercase hex
/// digits.
fn parse_checkpoint_name(name: &str) -> Option<Lsn> {
    if name.len() != UNDO_CHECKPOINT_FILENAME_LEN {
        return None;
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        return None;
    }
    u64::from_str_radix(name, 16).ok().map(Lsn::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UndoConfig;
    use crate::manager::UndoWriter;
    use crate::wal::MemoryRedoLog;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tern_common::types::{TablespaceId, TxnId, UndoRecPtr, XidEpoch};

    fn test_config(dir: &std::path::Path) -> UndoConfig {
        UndoConfig::new(dir)
            .with_segment_size(64)
            .with_max_log_size(1 << 16)
            .with_max_record_size(48)
    }

    fn populated_manager(dir: &std::path::Path) -> (UndoLogManager, Arc<MemoryRedoLog>) {
        let wal = Arc::new(MemoryRedoLog::new());
        let mgr = UndoLogManager::new(test_config(dir), wal.clone()).unwrap();
        let mut writer = UndoWriter::new();
        writer.set_transaction(TxnId::new(9), XidEpoch::new(1));

        for _ in 0..5 {
            let ptr = mgr
                .allocate(&mut writer, 30, Persistence::Permanent)
                .unwrap();
            mgr.advance(ptr, 30).unwrap();
        }
        let logno = writer.attached_log(Persistence::Permanent).unwrap();
        mgr.discard(UndoRecPtr::new(logno, 64), TxnId::INVALID)
            .unwrap();

        (mgr, wal)
    }

    #[test]
    fn test_checkpoint_restart_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _wal) = populated_manager(tmp.path());

        let logs: Vec<_> = mgr.active_logs();
        let before: Vec<_> = logs
            .iter()
            .map(|(logno, _)| (*logno, mgr.log_meta(*logno).unwrap()))
            .collect();

        let redo = Lsn::new(0xA000);
        mgr.checkpoint(redo, Lsn::INVALID).unwrap();

        // Fresh engine over the same directory; no WAL to replay.
        let mgr2 =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        mgr2.startup(redo).unwrap();

        for (logno, meta) in before {
            assert_eq!(mgr2.log_meta(logno).unwrap(), meta);
        }
        // The xid binding survives for recovery allocation.
        assert_eq!(
            mgr2.log_number_for_xid(TxnId::new(9)),
            mgr.log_number_for_xid(TxnId::new(9))
        );
    }

    #[test]
    fn test_checkpoint_replaces_prior_file() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _wal) = populated_manager(tmp.path());

        let first = Lsn::new(0x1000);
        let second = Lsn::new(0x2000);
        mgr.checkpoint(first, Lsn::INVALID).unwrap();
        assert!(mgr.config().checkpoint_path(first).exists());

        mgr.checkpoint(second, first).unwrap();
        assert!(!mgr.config().checkpoint_path(first).exists());
        assert!(mgr.config().checkpoint_path(second).exists());
    }

    #[test]
    fn test_startup_from_latest_picks_newest_and_skips_junk() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _wal) = populated_manager(tmp.path());

        mgr.checkpoint(Lsn::new(0x1000), Lsn::INVALID).unwrap();
        mgr.checkpoint(Lsn::new(0x2000), Lsn::INVALID).unwrap();

        // Junk that must be ignored: wrong length, lowercase hex.
        let dir = mgr.config().checkpoint_dir();
        std::fs::write(dir.join("not-a-checkpoint"), b"junk").unwrap();
        std::fs::write(dir.join("000000000000a000"), b"junk").unwrap();

        let mgr2 =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        let loaded = mgr2.startup_from_latest().unwrap();
        assert_eq!(loaded, Some(Lsn::new(0x2000)));
    }

    #[test]
    fn test_startup_from_latest_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let mgr =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        assert_eq!(mgr.startup_from_latest().unwrap(), None);
    }

    #[test]
    fn test_corrupt_checkpoints_rejected() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _wal) = populated_manager(tmp.path());
        let redo = Lsn::new(0x3000);
        mgr.checkpoint(redo, Lsn::INVALID).unwrap();

        let path = mgr.config().checkpoint_path(redo);
        let good = std::fs::read(&path).unwrap();

        let reload = |bytes: &[u8]| {
            let mgr2 =
                UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new()))
                    .unwrap();
            std::fs::write(&path, bytes).unwrap();
            mgr2.startup(redo)
        };

        // Flipped magic.
        let mut bad = good.clone();
        bad[0] ^= 0xFF;
        assert!(reload(&bad).unwrap_err().is_corruption());

        // Flipped body byte breaks the checksum.
        let mut bad = good.clone();
        *bad.last_mut().unwrap() ^= 0xFF;
        assert!(reload(&bad).unwrap_err().is_corruption());

        // Truncated body.
        assert!(reload(&good[..good.len() - 3]).unwrap_err().is_corruption());

        // The pristine bytes still load.
        assert!(reload(&good).is_ok());
    }

    #[test]
    fn test_temporary_logs_not_checkpointed() {
        let tmp = TempDir::new().unwrap();
        let wal = Arc::new(MemoryRedoLog::new());
        let mgr = UndoLogManager::new(test_config(tmp.path()), wal).unwrap();
        let mut writer = UndoWriter::new();

        let p = mgr
            .allocate(&mut writer, 10, Persistence::Permanent)
            .unwrap();
        mgr.advance(p, 10).unwrap();
        let t = mgr
            .allocate(&mut writer, 10, Persistence::Temporary)
            .unwrap();
        mgr.advance(t, 10).unwrap();

        let redo = Lsn::new(0x4000);
        mgr.checkpoint(redo, Lsn::INVALID).unwrap();

        let mgr2 =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        mgr2.startup(redo).unwrap();

        assert!(mgr2.log_meta(p.log_number()).is_ok());
        assert!(matches!(
            mgr2.log_meta(t.log_number()),
            Err(UndoError::LogNotFound { .. })
        ));
    }

    #[test]
    fn test_redo_rebuilds_state_from_wal() {
        let tmp = TempDir::new().unwrap();
        let (mgr, wal) = populated_manager(tmp.path());

        let logs = mgr.active_logs();
        let expected: Vec<_> = logs
            .iter()
            .map(|(logno, _)| (*logno, mgr.log_meta(*logno).unwrap()))
            .collect();

        // Fresh engine, no checkpoint: replay the whole stream.
        let mgr2 =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        for record in wal.records() {
            mgr2.redo(&record).unwrap();
        }

        for (logno, meta) in &expected {
            assert_eq!(&mgr2.log_meta(*logno).unwrap(), meta);
        }

        // Replaying the same stream again converges to the same state.
        for record in wal.records() {
            mgr2.redo(&record).unwrap();
        }
        for (logno, meta) in &expected {
            assert_eq!(&mgr2.log_meta(*logno).unwrap(), meta);
        }
    }

    #[test]
    fn test_allocate_in_recovery_reuses_recovered_log() {
        let tmp = TempDir::new().unwrap();
        let (mgr, wal) = populated_manager(tmp.path());
        let logno = mgr.log_number_for_xid(TxnId::new(9)).unwrap();
        let insert = mgr.log_meta(logno).unwrap().insert;

        let mgr2 =
            UndoLogManager::new(test_config(tmp.path()), Arc::new(MemoryRedoLog::new())).unwrap();
        for record in wal.records() {
            mgr2.redo(&record).unwrap();
        }

        let ptr = mgr2
            .allocate_in_recovery(TxnId::new(9), 30, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr.log_number(), logno);
        assert_eq!(ptr.offset(), insert);

        // An unseen xid must not be given a log.
        assert!(matches!(
            mgr2.allocate_in_recovery(TxnId::new(777), 30, Persistence::Permanent),
            Err(UndoError::Recovery { .. })
        ));
    }

    #[test]
    fn test_checkpoint_in_progress_defers_unlinks() {
        let tmp = TempDir::new().unwrap();
        let wal = Arc::new(MemoryRedoLog::new());
        let mgr = UndoLogManager::new(test_config(tmp.path()), wal).unwrap();
        let mut writer = UndoWriter::new();

        // Fill two whole segments.
        let mut last = UndoRecPtr::INVALID;
        for _ in 0..4 {
            last = mgr
                .allocate(&mut writer, 32, Persistence::Permanent)
                .unwrap();
            mgr.advance(last, 32).unwrap();
        }
        let logno = last.log_number();
        let seg0 = mgr.config().segment_path(logno, 0, TablespaceId::DEFAULT);

        mgr.set_checkpoint_in_progress(true).unwrap();
        mgr.discard(UndoRecPtr::new(logno, 64), TxnId::INVALID)
            .unwrap();

        // Metadata moved, but the file survives until the flag clears.
        assert_eq!(mgr.log_meta(logno).unwrap().discard, 64);
        assert!(seg0.exists());

        mgr.set_checkpoint_in_progress(false).unwrap();
        assert!(!seg0.exists());
    }

    #[test]
    fn test_parse_checkpoint_name() {
        assert_eq!(
            parse_checkpoint_name("000000000000A000"),
            Some(Lsn::new(0xA000))
        );
        assert_eq!(parse_checkpoint_name("000000000000a000"), None);
        assert_eq!(parse_checkpoint_name("A000"), None);
        assert_eq!(parse_checkpoint_name("000000000000G000"), None);
    }

    #[test]
    fn test_wal_stream_is_flushed_before_unlink() {
        // The discard record reaches the WAL before any file goes away;
        // the stream then reproduces the discard during replay.
        let tmp = TempDir::new().unwrap();
        let (mgr, wal) = populated_manager(tmp.path());
        let logno = mgr.active_logs()[0].0;

        let has_discard = wal
            .records()
            .iter()
            .any(|r| matches!(r, UndoWalRecord::Discard { logno: l, .. } if *l == logno));
        assert!(has_discard);
    }
}
