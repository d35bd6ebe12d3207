//! The undo log manager.
//!
//! Owns the shared table of log control slots, assigns logs to writers,
//! grows and recycles backing segment files, and enforces the discard
//! horizon.  Lock discipline: each slot has a single mutex held for
//! metadata reads and writes; segment I/O is staged outside it (plan under
//! the lock, perform I/O unlocked, publish under the lock).  A separate
//! manager-level mutex serializes log number assignment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use tern_common::types::{LogNumber, TablespaceId, TxnId, UndoRecPtr, XidEpoch};

use crate::config::UndoConfig;
use crate::error::{UndoError, UndoResult};
use crate::meta::{Persistence, SlotState, UndoLogMeta};
use crate::record::types::TransactionDetails;
use crate::record::UnpackedRecord;
use crate::segment;
use crate::wal::{RedoLog, UndoWalRecord};

/// Control slot for one undo log.
pub(crate) struct UndoLogSlot {
    pub(crate) logno: LogNumber,
    pub(crate) inner: Mutex<SlotInner>,
}

/// Slot contents guarded by the slot lock.
pub(crate) struct SlotInner {
    pub(crate) meta: UndoLogMeta,
    pub(crate) state: SlotState,
    /// Highest segment known to be fsynced; segments at or below it are
    /// skipped by incremental checkpoint flushes.
    pub(crate) highest_synced_segno: Option<u64>,
    /// Inclusive range of segments holding unflushed record bytes.
    pub(crate) dirty_segments: Option<(u64, u64)>,
}

impl UndoLogSlot {
    pub(crate) fn new(logno: LogNumber, meta: UndoLogMeta, state: SlotState) -> Arc<Self> {
        Arc::new(Self {
            logno,
            inner: Mutex::new(SlotInner {
                meta,
                state,
                highest_synced_segno: None,
                dirty_segments: None,
            }),
        })
    }
}

/// Per-writer session state: the logs this writer is attached to, one per
/// persistence level, plus its current transaction.
///
/// Each writer thread owns one `UndoWriter` and passes it into the
/// allocation entry points; the manager itself holds no thread-local
/// state.
#[derive(Debug)]
pub struct UndoWriter {
    attached: [Option<LogNumber>; 3],
    xid: TxnId,
    xid_epoch: XidEpoch,
}

impl Default for UndoWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoWriter {
    /// Creates a writer session with no attachments and no transaction.
    pub fn new() -> Self {
        Self {
            attached: [None; 3],
            xid: TxnId::INVALID,
            xid_epoch: XidEpoch::new(0),
        }
    }

    /// Sets the transaction this writer is working for.  The next
    /// allocation against any log notices the change and marks a new
    /// transaction start there.
    pub fn set_transaction(&mut self, xid: TxnId, xid_epoch: XidEpoch) {
        self.xid = xid;
        self.xid_epoch = xid_epoch;
    }

    /// The writer's current transaction.
    pub fn xid(&self) -> TxnId {
        self.xid
    }

    /// The log this writer is attached to at the given persistence level.
    pub fn attached_log(&self, persistence: Persistence) -> Option<LogNumber> {
        self.attached[persistence.slot_index()]
    }
}

/// The undo log engine handle.
///
/// Holds the shared control slots and all engine-global state; construct
/// one per data directory and pass it into every entry point.  Tests
/// construct isolated instances over temporary directories.
pub struct UndoLogManager {
    pub(crate) config: Arc<UndoConfig>,
    pub(crate) wal: Arc<dyn RedoLog>,
    pub(crate) slots: RwLock<HashMap<LogNumber, Arc<UndoLogSlot>>>,
    /// Serializes log number assignment (the coarse slot-allocation lock).
    pub(crate) next_logno: Mutex<u32>,
    /// Which log each in-flight transaction writes to; rebuilt from WAL
    /// replay during recovery.
    pub(crate) xid_logs: RwLock<HashMap<TxnId, LogNumber>>,
    pub(crate) checkpoint_in_progress: AtomicBool,
    /// Unlinks deferred while a checkpoint is in progress.
    pub(crate) pending_unlinks: Mutex<Vec<PathBuf>>,
    /// Held by checkpoint to quiesce discard; allocate/append continue.
    pub(crate) discard_quiesce: Mutex<()>,
}

impl UndoLogManager {
    /// Creates an engine over the given directory.
    pub fn new(config: UndoConfig, wal: Arc<dyn RedoLog>) -> UndoResult<Self> {
        config.validate().map_err(UndoError::config)?;

        std::fs::create_dir_all(config.tablespace_dir(TablespaceId::DEFAULT))?;
        std::fs::create_dir_all(config.checkpoint_dir())?;

        Ok(Self {
            config: Arc::new(config),
            wal,
            slots: RwLock::new(HashMap::new()),
            next_logno: Mutex::new(0),
            xid_logs: RwLock::new(HashMap::new()),
            checkpoint_in_progress: AtomicBool::new(false),
            pending_unlinks: Mutex::new(Vec::new()),
            discard_quiesce: Mutex::new(()),
        })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Reserves `size` bytes in an undo log of the requested persistence
    /// level and returns the insertion address.
    ///
    /// The caller must write exactly `size` bytes at the returned address
    /// and then call [`advance`](Self::advance); until it does, repeated
    /// calls return the same address.  When the attached log cannot fit
    /// the request it is left behind as exhausted and a successor is
    /// attached transparently.
    pub fn allocate(
        &self,
        writer: &mut UndoWriter,
        size: usize,
        persistence: Persistence,
    ) -> UndoResult<UndoRecPtr> {
        if size == 0 || size > self.config.max_record_size {
            return Err(UndoError::RecordTooLarge {
                size,
                max: self.config.max_record_size,
            });
        }

        loop {
            let slot = match writer.attached[persistence.slot_index()] {
                Some(logno) => match self.slot(logno) {
                    Ok(slot) => slot,
                    // The log was destroyed under us (fully discarded);
                    // fall through to a fresh attachment.
                    Err(UndoError::LogNotFound { .. }) => {
                        writer.attached[persistence.slot_index()] = None;
                        self.attach(writer, persistence)?
                    }
                    Err(err) => return Err(err),
                },
                None => self.attach(writer, persistence)?,
            };

            // Exhaustion: leave the log behind and loop to attach a fresh
            // one.  The old log keeps its insert pointer and stays
            // readable until discarded.
            {
                let mut inner = slot.inner.lock();
                if inner.meta.insert + size as u64 > self.config.max_log_size {
                    inner.state = SlotState::Exhausted;
                    inner.meta.xid = TxnId::INVALID;
                    writer.attached[persistence.slot_index()] = None;
                    info!(logno = slot.logno.as_u32(), insert = inner.meta.insert,
                          "undo log exhausted, switching to a successor");
                    continue;
                }
            }

            self.extend_if_needed(&slot, size, persistence)?;

            let mut inner = slot.inner.lock();
            let insert = inner.meta.insert;

            // New transaction in this log: remember where it starts.
            if inner.meta.xid != writer.xid {
                if persistence.needs_wal() {
                    self.wal.append(&UndoWalRecord::MarkXactStart {
                        logno: slot.logno,
                        offset: insert,
                        xid: writer.xid,
                        xid_epoch: writer.xid_epoch,
                    })?;
                }
                inner.meta.xid = writer.xid;
                inner.meta.xid_epoch = writer.xid_epoch;
                inner.meta.is_first_rec = true;
                inner.meta.last_xact_start = insert;
                if writer.xid.is_valid() {
                    self.xid_logs.write().insert(writer.xid, slot.logno);
                }
            }

            return Ok(UndoRecPtr::new(slot.logno, insert));
        }
    }

    /// Reserves space during WAL replay.
    ///
    /// Recovery must reproduce the exact log number observed before the
    /// crash, so the log is resolved from the replayed `xid -> logno`
    /// binding instead of a writer session; an unseen xid is a replay
    /// ordering bug and fails.
    pub fn allocate_in_recovery(
        &self,
        xid: TxnId,
        size: usize,
        _persistence: Persistence,
    ) -> UndoResult<UndoRecPtr> {
        if size == 0 || size > self.config.max_record_size {
            return Err(UndoError::RecordTooLarge {
                size,
                max: self.config.max_record_size,
            });
        }

        let logno = self
            .xid_logs
            .read()
            .get(&xid)
            .copied()
            .ok_or_else(|| UndoError::recovery(format!("no undo log recovered for xid {}", xid)))?;

        let slot = self.slot(logno)?;
        let persistence = slot.inner.lock().meta.persistence;
        self.extend_if_needed(&slot, size, persistence)?;

        let insert = slot.inner.lock().meta.insert;
        Ok(UndoRecPtr::new(logno, insert))
    }

    /// Publishes an append: the caller wrote exactly `size` bytes at
    /// `ptr`, which must be the address the preceding
    /// [`allocate`](Self::allocate) returned.
    pub fn advance(&self, ptr: UndoRecPtr, size: usize) -> UndoResult<()> {
        let slot = self.slot(ptr.log_number())?;
        let mut inner = slot.inner.lock();

        assert_eq!(
            ptr.offset(),
            inner.meta.insert,
            "undo advance out of order: pointer does not match the insertion point"
        );

        inner.meta.insert += size as u64;
        inner.meta.prevlen = size as u16;
        inner.meta.is_first_rec = false;

        // The appended bytes dirtied these segments.
        let low = ptr.offset() / self.config.segment_size;
        let high = (inner.meta.insert - 1) / self.config.segment_size;
        inner.dirty_segments = Some(match inner.dirty_segments {
            Some((lo, hi)) => (lo.min(low), hi.max(high)),
            None => (low, high),
        });

        if inner.meta.persistence.needs_wal() {
            self.wal.append(&UndoWalRecord::AdvanceInsert {
                logno: slot.logno,
                xid: inner.meta.xid,
                xid_epoch: inner.meta.xid_epoch,
                insert: inner.meta.insert,
                prevlen: size as u16,
            })?;
        }

        Ok(())
    }

    /// Truncates the log head back to `ptr`, restoring `prevlen`; used to
    /// undo a partial write when the owning transaction aborts.  Segments
    /// are not shrunk; they are reclaimed only by discard.
    pub fn rewind(&self, ptr: UndoRecPtr, prevlen: u16) -> UndoResult<()> {
        let slot = self.slot(ptr.log_number())?;
        let mut inner = slot.inner.lock();

        assert!(
            ptr.offset() <= inner.meta.insert,
            "undo rewind forward: pointer is past the insertion point"
        );

        inner.meta.insert = ptr.offset();
        inner.meta.prevlen = prevlen;

        if inner.meta.persistence.needs_wal() {
            self.wal.append(&UndoWalRecord::Rewind {
                logno: slot.logno,
                insert: ptr.offset(),
                prevlen,
            })?;
        }

        Ok(())
    }

    // =========================================================================
    // Discard
    // =========================================================================

    /// Advances the discard pointer of the log containing `point` to that
    /// offset, unlinking any segment that falls entirely below it.  A
    /// point at or before the current discard pointer is a no-op.
    pub fn discard(&self, point: UndoRecPtr, xid: TxnId) -> UndoResult<()> {
        let _quiesce = self.discard_quiesce.lock();

        let logno = point.log_number();
        let slot = match self.slot(logno) {
            Ok(slot) => slot,
            // Already destroyed: everything below any point is gone.
            Err(UndoError::LogNotFound { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };

        let seg = self.config.segment_size;
        let (unlink_segnos, tablespace, destroy, wal_needed) = {
            let mut inner = slot.inner.lock();
            let new_discard = point.offset();

            if new_discard <= inner.meta.discard {
                return Ok(());
            }
            if new_discard > inner.meta.insert {
                return Err(UndoError::InvalidPointer { ptr: point });
            }

            let first_remaining = inner.meta.discard / seg;
            let below = new_discard / seg;
            inner.meta.discard = new_discard;

            let destroy = matches!(
                inner.state,
                SlotState::Exhausted | SlotState::FullyDiscarded
            ) && new_discard >= inner.meta.insert;
            if destroy {
                inner.state = SlotState::FullyDiscarded;
            }

            // On destruction the trailing, partially discarded segments go
            // as well.
            let upper = if destroy { inner.meta.end / seg } else { below };
            let segnos: Vec<u64> = (first_remaining..upper).collect();

            (
                segnos,
                inner.meta.tablespace,
                destroy,
                inner.meta.persistence.needs_wal(),
            )
        };

        // Write-ahead: the unlink must be replayable before it happens.
        if wal_needed {
            let lsn = self.wal.append(&UndoWalRecord::Discard {
                logno,
                discard: point.offset(),
                unlink: !unlink_segnos.is_empty(),
                destroyed: destroy,
            })?;
            self.wal.flush(lsn)?;
        }

        let paths: Vec<PathBuf> = unlink_segnos
            .iter()
            .map(|&segno| self.config.segment_path(logno, segno, tablespace))
            .collect();
        self.unlink_or_defer(paths, tablespace)?;

        if destroy {
            self.slots.write().remove(&logno);
            self.xid_logs.write().retain(|_, l| *l != logno);
            info!(logno = logno.as_u32(), "undo log fully discarded and destroyed");
        }

        if xid.is_valid() {
            let mut xid_logs = self.xid_logs.write();
            if xid_logs.get(&xid) == Some(&logno) {
                xid_logs.remove(&xid);
            }
        }

        Ok(())
    }

    /// True iff the byte addressed by `ptr` is below its log's discard
    /// horizon (or the whole log is gone).
    pub fn is_discarded(&self, ptr: UndoRecPtr) -> bool {
        match self.slot(ptr.log_number()) {
            Ok(slot) => ptr.offset() < slot.inner.lock().meta.discard,
            Err(_) => true,
        }
    }

    // =========================================================================
    // Metadata queries
    // =========================================================================

    /// The writer's next insertion address in its attached log of the
    /// given persistence, if any.
    pub fn current_location(
        &self,
        writer: &UndoWriter,
        persistence: Persistence,
    ) -> Option<UndoRecPtr> {
        let logno = writer.attached[persistence.slot_index()]?;
        let slot = self.slot(logno).ok()?;
        let insert = slot.inner.lock().meta.insert;
        Some(UndoRecPtr::new(logno, insert))
    }

    /// The next insertion address of `logno`, provided `xid` is the
    /// transaction currently writing to it.
    pub fn next_insert_ptr(&self, logno: LogNumber, xid: TxnId) -> UndoResult<UndoRecPtr> {
        let slot = self.slot(logno)?;
        let inner = slot.inner.lock();
        if inner.meta.xid != xid {
            return Ok(UndoRecPtr::INVALID);
        }
        Ok(UndoRecPtr::new(logno, inner.meta.insert))
    }

    /// The oldest readable address in `logno`, or invalid when the log is
    /// fully consumed.
    pub fn first_valid_record(&self, logno: LogNumber) -> UndoResult<UndoRecPtr> {
        let slot = self.slot(logno)?;
        let inner = slot.inner.lock();
        if inner.meta.discard >= inner.meta.insert {
            return Ok(UndoRecPtr::INVALID);
        }
        Ok(UndoRecPtr::new(logno, inner.meta.discard))
    }

    /// Where the current/last transaction's undo begins in `logno`.
    pub fn last_xact_start(&self, logno: LogNumber) -> UndoResult<UndoRecPtr> {
        let slot = self.slot(logno)?;
        let inner = slot.inner.lock();
        if inner.meta.last_xact_start == 0 && !inner.meta.xid.is_valid() {
            return Ok(UndoRecPtr::INVALID);
        }
        Ok(UndoRecPtr::new(logno, inner.meta.last_xact_start))
    }

    /// Overwrites the recorded length of the last appended record.
    pub fn set_prevlen(&self, logno: LogNumber, prevlen: u16) -> UndoResult<()> {
        let slot = self.slot(logno)?;
        let mut inner = slot.inner.lock();
        inner.meta.prevlen = prevlen;
        if inner.meta.persistence.needs_wal() {
            self.wal
                .append(&UndoWalRecord::SetPrevLen { logno, prevlen })?;
        }
        Ok(())
    }

    /// The length of the last record appended to `logno`.
    pub fn get_prevlen(&self, logno: LogNumber) -> UndoResult<u16> {
        Ok(self.slot(logno)?.inner.lock().meta.prevlen)
    }

    /// The log `xid` is writing its undo into, if known.
    pub fn log_number_for_xid(&self, xid: TxnId) -> Option<LogNumber> {
        self.xid_logs.read().get(&xid).copied()
    }

    /// True iff `xid` has begun writing into a log but not yet appended
    /// its first record there.
    pub fn is_transaction_first_rec(&self, xid: TxnId) -> bool {
        let Some(logno) = self.log_number_for_xid(xid) else {
            return false;
        };
        match self.slot(logno) {
            Ok(slot) => {
                let inner = slot.inner.lock();
                inner.meta.xid == xid && inner.meta.is_first_rec
            }
            Err(_) => false,
        }
    }

    /// Snapshot of every live log, in log number order.
    pub fn active_logs(&self) -> Vec<(LogNumber, TablespaceId)> {
        let slots = self.slots.read();
        let mut logs: Vec<(LogNumber, TablespaceId)> = slots
            .values()
            .map(|slot| (slot.logno, slot.inner.lock().meta.tablespace))
            .collect();
        logs.sort_by_key(|(logno, _)| *logno);
        logs
    }

    /// Copy of a log's control metadata.
    pub fn log_meta(&self, logno: LogNumber) -> UndoResult<UndoLogMeta> {
        Ok(self.slot(logno)?.inner.lock().meta.clone())
    }

    /// The inclusive range of segments of `logno` holding unflushed record
    /// bytes, if any.
    pub fn dirty_segment_range(&self, logno: LogNumber) -> UndoResult<Option<(u64, u64)>> {
        Ok(self.slot(logno)?.inner.lock().dirty_segments)
    }

    /// Records that every segment of `logno` up to `segno` is fsynced, so
    /// incremental checkpoints skip them.
    pub fn set_highest_synced_segment(&self, logno: LogNumber, segno: u64) -> UndoResult<()> {
        let slot = self.slot(logno)?;
        let mut inner = slot.inner.lock();
        inner.highest_synced_segno = Some(match inner.highest_synced_segno {
            Some(prev) => prev.max(segno),
            None => segno,
        });
        Ok(())
    }

    /// The highest segment of `logno` known to be fsynced.
    pub fn highest_synced_segment(&self, logno: LogNumber) -> UndoResult<Option<u64>> {
        Ok(self.slot(logno)?.inner.lock().highest_synced_segno)
    }

    /// Relation identity for buffer-cache calls against the page holding
    /// `ptr`: the backing tablespace, the undo pseudo-database, and the
    /// log number standing in for the relation file.
    pub fn buffer_tag(&self, ptr: UndoRecPtr) -> UndoResult<(TablespaceId, u32, u32)> {
        let logno = ptr.log_number();
        let tablespace = self.slot(logno)?.inner.lock().meta.tablespace;
        Ok((
            tablespace,
            tern_common::constants::UNDO_DATABASE_ID,
            logno.as_u32(),
        ))
    }

    /// Detaches the writer from all its logs, returning them to the idle
    /// pool for other writers.
    pub fn detach(&self, writer: &mut UndoWriter) {
        for attached in writer.attached.iter_mut() {
            if let Some(logno) = attached.take() {
                if let Ok(slot) = self.slot(logno) {
                    let mut inner = slot.inner.lock();
                    if inner.state == SlotState::Attached {
                        inner.state = SlotState::Idle;
                    }
                    inner.meta.xid = TxnId::INVALID;
                }
            }
        }
    }

    // =========================================================================
    // Record append over direct segment I/O
    // =========================================================================

    /// Allocates, serializes, and publishes `record` in one step, writing
    /// straight into the backing segment files.
    ///
    /// Stamps the record's `prevlen` from the log and adds the transaction
    /// header when this is the transaction's first record in the log.
    pub fn append_record(
        &self,
        writer: &mut UndoWriter,
        record: &mut UnpackedRecord,
        persistence: Persistence,
    ) -> UndoResult<UndoRecPtr> {
        let ptr = loop {
            let size = record.expected_size();
            let ptr = self.allocate(writer, size, persistence)?;

            let slot = self.slot(ptr.log_number())?;
            let inner = slot.inner.lock();
            record.prevlen = inner.meta.prevlen;

            // First record of the transaction in this log carries the
            // transaction header; adding it grows the record, so re-run
            // the allocation with the new size.
            if inner.meta.is_first_rec && record.xact.is_none() {
                record.xact = Some(TransactionDetails {
                    xid_epoch: inner.meta.xid_epoch,
                    next: None,
                });
                continue;
            }

            break ptr;
        };

        let packed = record.to_bytes();
        self.write_log_bytes(ptr.log_number(), ptr.offset(), &packed)?;
        self.advance(ptr, packed.len())?;

        Ok(ptr)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) fn slot(&self, logno: LogNumber) -> UndoResult<Arc<UndoLogSlot>> {
        self.slots
            .read()
            .get(&logno)
            .cloned()
            .ok_or(UndoError::LogNotFound { logno })
    }

    /// Attaches the writer to an idle log of the right persistence, or
    /// creates a new one.
    fn attach(
        &self,
        writer: &mut UndoWriter,
        persistence: Persistence,
    ) -> UndoResult<Arc<UndoLogSlot>> {
        // Prefer the lowest-numbered idle log for determinism.
        let mut candidates: Vec<Arc<UndoLogSlot>> = self.slots.read().values().cloned().collect();
        candidates.sort_by_key(|slot| slot.logno);

        for slot in candidates {
            let mut inner = slot.inner.lock();
            if inner.state == SlotState::Idle && inner.meta.persistence == persistence {
                inner.state = SlotState::Attached;
                drop(inner);
                writer.attached[persistence.slot_index()] = Some(slot.logno);
                return Ok(slot);
            }
        }

        self.create_log(writer, persistence)
    }

    /// Creates a brand new log attached to the writer.
    fn create_log(
        &self,
        writer: &mut UndoWriter,
        persistence: Persistence,
    ) -> UndoResult<Arc<UndoLogSlot>> {
        let tablespace = TablespaceId::DEFAULT;

        let mut next_logno = self.next_logno.lock();
        if u64::from(*next_logno) >= (1u64 << tern_common::constants::UNDO_LOG_NUMBER_BITS) {
            return Err(UndoError::resource_exhausted(
                "undo log number space exhausted",
            ));
        }
        let logno = LogNumber::new(*next_logno);

        if persistence.needs_wal() {
            let lsn = self.wal.append(&UndoWalRecord::CreateLog {
                logno,
                persistence,
                tablespace,
            })?;
            self.wal.flush(lsn)?;
        }

        std::fs::create_dir_all(self.config.tablespace_dir(tablespace))?;

        let slot = UndoLogSlot::new(
            logno,
            UndoLogMeta::new(tablespace, persistence),
            SlotState::Attached,
        );
        self.slots.write().insert(logno, slot.clone());
        *next_logno += 1;
        drop(next_logno);

        writer.attached[persistence.slot_index()] = Some(logno);
        info!(logno = logno.as_u32(), ?persistence, "created undo log");
        Ok(slot)
    }

    /// Grows the log until `size` more bytes fit past the insertion point.
    ///
    /// The extension plan is computed under the slot lock, the segment
    /// files are created and fsynced with the lock released, and the new
    /// end is published afterwards.  Only the owning writer extends a log,
    /// so the unlocked window races with nothing but discard, which never
    /// touches segments at or past the insertion point.
    fn extend_if_needed(
        &self,
        slot: &Arc<UndoLogSlot>,
        size: usize,
        persistence: Persistence,
    ) -> UndoResult<()> {
        let seg = self.config.segment_size;

        let (old_end, new_end, tablespace) = {
            let inner = slot.inner.lock();
            let needed = inner.meta.insert + size as u64;
            if needed <= inner.meta.end {
                return Ok(());
            }
            let mut new_end = inner.meta.end;
            while new_end < needed {
                new_end += seg;
            }
            (inner.meta.end, new_end, inner.meta.tablespace)
        };

        // Write-ahead: the extension must be replayable before the files
        // count as durable.
        if persistence.needs_wal() {
            let lsn = self.wal.append(&UndoWalRecord::ExtendSegments {
                logno: slot.logno,
                new_end,
            })?;
            self.wal.flush(lsn)?;
        }

        for segno in (old_end / seg)..(new_end / seg) {
            let path = self.config.segment_path(slot.logno, segno, tablespace);
            segment::create_segment(&path, seg)?;
        }

        let mut inner = slot.inner.lock();
        if new_end > inner.meta.end {
            inner.meta.end = new_end;
        }
        debug!(logno = slot.logno.as_u32(), end = inner.meta.end, "extended undo log");
        Ok(())
    }

    /// Unlinks segment files now, or queues them if a checkpoint is in
    /// progress (its snapshot may still reference them).
    pub(crate) fn unlink_or_defer(
        &self,
        paths: Vec<PathBuf>,
        tablespace: TablespaceId,
    ) -> UndoResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        if self
            .checkpoint_in_progress
            .load(std::sync::atomic::Ordering::Acquire)
        {
            self.pending_unlinks.lock().extend(paths);
            return Ok(());
        }

        for path in &paths {
            segment::unlink_segment(path)?;
        }
        segment::fsync_dir(&self.config.tablespace_dir(tablespace))?;
        Ok(())
    }

    /// Writes `data` into the log's flat byte space starting at `offset`,
    /// spanning segment files as needed.
    pub(crate) fn write_log_bytes(
        &self,
        logno: LogNumber,
        offset: u64,
        data: &[u8],
    ) -> UndoResult<()> {
        let tablespace = self.slot(logno)?.inner.lock().meta.tablespace;
        let seg = self.config.segment_size;

        let mut pos = offset;
        let mut remaining = data;
        while !remaining.is_empty() {
            let segno = pos / seg;
            let within = pos % seg;
            let n = ((seg - within) as usize).min(remaining.len());
            let path = self.config.segment_path(logno, segno, tablespace);
            segment::write_at(&path, within, &remaining[..n])?;
            pos += n as u64;
            remaining = &remaining[n..];
        }
        Ok(())
    }

    /// Reads from the log's flat byte space into `buf`.
    pub(crate) fn read_log_bytes(
        &self,
        logno: LogNumber,
        offset: u64,
        buf: &mut [u8],
    ) -> UndoResult<()> {
        let tablespace = self.slot(logno)?.inner.lock().meta.tablespace;
        let seg = self.config.segment_size;

        let mut pos = offset;
        let mut filled = 0;
        while filled < buf.len() {
            let segno = pos / seg;
            let within = pos % seg;
            let n = ((seg - within) as usize).min(buf.len() - filled);
            let path = self.config.segment_path(logno, segno, tablespace);
            segment::read_at(&path, within, &mut buf[filled..filled + n])?;
            pos += n as u64;
            filled += n;
        }
        Ok(())
    }
}

impl std::fmt::Debug for UndoLogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoLogManager")
            .field("dir", &self.config.dir)
            .field("logs", &self.slots.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::MemoryRedoLog;
    use tempfile::TempDir;

    fn test_manager(dir: &std::path::Path) -> UndoLogManager {
        let config = UndoConfig::new(dir)
            .with_segment_size(1024)
            .with_max_log_size(1 << 20)
            .with_max_record_size(512);
        UndoLogManager::new(config, Arc::new(MemoryRedoLog::new())).unwrap()
    }

    #[test]
    fn test_allocate_write_rewind() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        let ptr1 = mgr
            .allocate(&mut writer, 100, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr1.log_number(), LogNumber::new(0));
        assert_eq!(ptr1.offset(), 0);

        mgr.advance(ptr1, 100).unwrap();
        assert_eq!(mgr.get_prevlen(LogNumber::new(0)).unwrap(), 100);

        let ptr2 = mgr
            .allocate(&mut writer, 200, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr2.offset(), 100);

        mgr.rewind(ptr1, 0).unwrap();
        let meta = mgr.log_meta(LogNumber::new(0)).unwrap();
        assert_eq!(meta.insert, 0);
        assert_eq!(meta.prevlen, 0);

        let ptr3 = mgr
            .allocate(&mut writer, 50, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr3.offset(), 0);
    }

    #[test]
    fn test_allocate_rejects_bad_sizes() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        assert!(matches!(
            mgr.allocate(&mut writer, 0, Persistence::Permanent),
            Err(UndoError::RecordTooLarge { .. })
        ));
        assert!(matches!(
            mgr.allocate(&mut writer, 513, Persistence::Permanent),
            Err(UndoError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_extension_creates_zeroed_segments() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        let ptr = mgr
            .allocate(&mut writer, 300, Persistence::Permanent)
            .unwrap();
        let meta = mgr.log_meta(ptr.log_number()).unwrap();
        assert_eq!(meta.end, 1024);
        assert!(mgr
            .config
            .segment_path(ptr.log_number(), 0, TablespaceId::DEFAULT)
            .exists());

        // Fill past the first segment; a second segment appears.
        mgr.advance(ptr, 300).unwrap();
        for _ in 0..3 {
            let p = mgr
                .allocate(&mut writer, 300, Persistence::Permanent)
                .unwrap();
            mgr.advance(p, 300).unwrap();
        }
        let meta = mgr.log_meta(ptr.log_number()).unwrap();
        assert_eq!(meta.insert, 1200);
        assert_eq!(meta.end, 2048);
        assert_eq!(meta.end % mgr.config.segment_size, 0);
        assert!(mgr
            .config
            .segment_path(ptr.log_number(), 1, TablespaceId::DEFAULT)
            .exists());
    }

    #[test]
    fn test_invariants_hold() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        for size in [10usize, 200, 64, 300, 12] {
            let ptr = mgr
                .allocate(&mut writer, size, Persistence::Permanent)
                .unwrap();
            mgr.advance(ptr, size).unwrap();

            let meta = mgr.log_meta(ptr.log_number()).unwrap();
            assert!(meta.discard <= meta.insert);
            assert!(meta.insert <= meta.end);
            assert!(meta.end <= mgr.config.max_log_size);
            assert_eq!(meta.end % mgr.config.segment_size, 0);
            assert_eq!(meta.insert, ptr.offset() + size as u64);
            assert_eq!(meta.prevlen, size as u16);
        }
    }

    #[test]
    #[should_panic(expected = "undo advance out of order")]
    fn test_advance_mismatch_panics() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        let ptr = mgr
            .allocate(&mut writer, 10, Persistence::Permanent)
            .unwrap();
        mgr.advance(ptr, 10).unwrap();
        // Stale pointer: insert moved past it.
        mgr.advance(ptr, 10).unwrap();
    }

    #[test]
    fn test_discard_releases_segments() {
        let tmp = TempDir::new().unwrap();
        // Segment size 64 so whole segments fall quickly.
        let config = UndoConfig::new(tmp.path())
            .with_segment_size(64)
            .with_max_log_size(1 << 16)
            .with_max_record_size(48);
        let mgr = UndoLogManager::new(config, Arc::new(MemoryRedoLog::new())).unwrap();
        let mut writer = UndoWriter::new();
        writer.set_transaction(TxnId::new(5), XidEpoch::new(0));

        // Fill three segments and a bit.
        let mut last = UndoRecPtr::INVALID;
        for _ in 0..7 {
            last = mgr
                .allocate(&mut writer, 30, Persistence::Permanent)
                .unwrap();
            mgr.advance(last, 30).unwrap();
        }
        let logno = last.log_number();
        let meta = mgr.log_meta(logno).unwrap();
        assert_eq!(meta.insert, 210);
        assert_eq!(meta.end, 256);

        mgr.discard(UndoRecPtr::new(logno, 128), TxnId::INVALID)
            .unwrap();

        let meta = mgr.log_meta(logno).unwrap();
        assert_eq!(meta.discard, 128);
        assert!(!mgr
            .config
            .segment_path(logno, 0, TablespaceId::DEFAULT)
            .exists());
        assert!(!mgr
            .config
            .segment_path(logno, 1, TablespaceId::DEFAULT)
            .exists());
        assert!(mgr
            .config
            .segment_path(logno, 2, TablespaceId::DEFAULT)
            .exists());

        assert!(mgr.is_discarded(UndoRecPtr::new(logno, 63)));
        assert!(mgr.is_discarded(UndoRecPtr::new(logno, 127)));
        assert!(!mgr.is_discarded(UndoRecPtr::new(logno, 128)));

        // Monotonicity: an older point is a no-op.
        mgr.discard(UndoRecPtr::new(logno, 64), TxnId::INVALID)
            .unwrap();
        assert_eq!(mgr.log_meta(logno).unwrap().discard, 128);
    }

    #[test]
    fn test_log_exhaustion_switches_logs() {
        let tmp = TempDir::new().unwrap();
        let config = UndoConfig::new(tmp.path())
            .with_segment_size(64)
            .with_max_log_size(256)
            .with_max_record_size(32);
        let mgr = UndoLogManager::new(config, Arc::new(MemoryRedoLog::new())).unwrap();
        let mut writer = UndoWriter::new();

        // Push insert to 250.
        for _ in 0..10 {
            let ptr = mgr
                .allocate(&mut writer, 25, Persistence::Permanent)
                .unwrap();
            mgr.advance(ptr, 25).unwrap();
        }
        let old = writer.attached_log(Persistence::Permanent).unwrap();
        assert_eq!(mgr.log_meta(old).unwrap().insert, 250);

        // 20 more bytes cannot fit; a successor log appears.
        let ptr = mgr
            .allocate(&mut writer, 20, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr.log_number(), old.next());
        assert_eq!(ptr.offset(), 0);

        // The exhausted log is untouched and still readable.
        assert_eq!(mgr.log_meta(old).unwrap().insert, 250);
        assert!(!mgr.is_discarded(UndoRecPtr::new(old, 100)));
    }

    #[test]
    fn test_exhausted_log_destroyed_when_fully_discarded() {
        let tmp = TempDir::new().unwrap();
        let config = UndoConfig::new(tmp.path())
            .with_segment_size(64)
            .with_max_log_size(256)
            .with_max_record_size(32);
        let mgr = UndoLogManager::new(config, Arc::new(MemoryRedoLog::new())).unwrap();
        let mut writer = UndoWriter::new();

        for _ in 0..8 {
            let ptr = mgr
                .allocate(&mut writer, 32, Persistence::Permanent)
                .unwrap();
            mgr.advance(ptr, 32).unwrap();
        }
        let old = writer.attached_log(Persistence::Permanent).unwrap();
        assert_eq!(mgr.log_meta(old).unwrap().insert, 256);

        // Force the exhaustion transition.
        let _ = mgr.allocate(&mut writer, 32, Persistence::Permanent).unwrap();

        mgr.discard(UndoRecPtr::new(old, 256), TxnId::INVALID)
            .unwrap();
        assert!(matches!(
            mgr.log_meta(old),
            Err(UndoError::LogNotFound { .. })
        ));
        assert!(mgr.is_discarded(UndoRecPtr::new(old, 0)));
        assert!(!mgr
            .config
            .segment_path(old, 0, TablespaceId::DEFAULT)
            .exists());
    }

    #[test]
    fn test_transaction_marking() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();
        writer.set_transaction(TxnId::new(7), XidEpoch::new(1));

        let ptr = mgr
            .allocate(&mut writer, 40, Persistence::Permanent)
            .unwrap();
        let logno = ptr.log_number();

        assert!(mgr.is_transaction_first_rec(TxnId::new(7)));
        assert_eq!(mgr.log_number_for_xid(TxnId::new(7)), Some(logno));
        let meta = mgr.log_meta(logno).unwrap();
        assert_eq!(meta.last_xact_start, 0);
        assert_eq!(meta.xid, TxnId::new(7));

        mgr.advance(ptr, 40).unwrap();
        assert!(!mgr.is_transaction_first_rec(TxnId::new(7)));

        // A second transaction in the same log restarts the marking.
        writer.set_transaction(TxnId::new(8), XidEpoch::new(1));
        let ptr = mgr
            .allocate(&mut writer, 10, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr.offset(), 40);
        let meta = mgr.log_meta(logno).unwrap();
        assert_eq!(meta.last_xact_start, 40);
        assert!(meta.is_first_rec);
        assert_eq!(
            mgr.last_xact_start(logno).unwrap(),
            UndoRecPtr::new(logno, 40)
        );
    }

    #[test]
    fn test_next_insert_ptr_checks_xid() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();
        writer.set_transaction(TxnId::new(3), XidEpoch::new(0));

        let ptr = mgr
            .allocate(&mut writer, 16, Persistence::Permanent)
            .unwrap();
        mgr.advance(ptr, 16).unwrap();
        let logno = ptr.log_number();

        assert_eq!(
            mgr.next_insert_ptr(logno, TxnId::new(3)).unwrap(),
            UndoRecPtr::new(logno, 16)
        );
        assert_eq!(
            mgr.next_insert_ptr(logno, TxnId::new(99)).unwrap(),
            UndoRecPtr::INVALID
        );
    }

    #[test]
    fn test_detach_returns_log_to_idle_pool() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());

        let mut writer1 = UndoWriter::new();
        let ptr = mgr
            .allocate(&mut writer1, 10, Persistence::Permanent)
            .unwrap();
        mgr.advance(ptr, 10).unwrap();
        let logno = ptr.log_number();

        mgr.detach(&mut writer1);
        assert_eq!(writer1.attached_log(Persistence::Permanent), None);

        // A second writer reuses the idle log instead of creating one.
        let mut writer2 = UndoWriter::new();
        let ptr = mgr
            .allocate(&mut writer2, 10, Persistence::Permanent)
            .unwrap();
        assert_eq!(ptr.log_number(), logno);
        assert_eq!(ptr.offset(), 10);
    }

    #[test]
    fn test_persistence_levels_use_separate_logs() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        let p = mgr
            .allocate(&mut writer, 10, Persistence::Permanent)
            .unwrap();
        let u = mgr
            .allocate(&mut writer, 10, Persistence::Unlogged)
            .unwrap();
        let t = mgr
            .allocate(&mut writer, 10, Persistence::Temporary)
            .unwrap();

        assert_ne!(p.log_number(), u.log_number());
        assert_ne!(u.log_number(), t.log_number());
        assert_ne!(p.log_number(), t.log_number());
        assert_eq!(mgr.active_logs().len(), 3);
    }

    #[test]
    fn test_dirty_segment_tracking() {
        let tmp = TempDir::new().unwrap();
        let config = UndoConfig::new(tmp.path())
            .with_segment_size(64)
            .with_max_log_size(1 << 16)
            .with_max_record_size(48);
        let mgr = UndoLogManager::new(config, Arc::new(MemoryRedoLog::new())).unwrap();
        let mut writer = UndoWriter::new();

        let ptr = mgr
            .allocate(&mut writer, 40, Persistence::Permanent)
            .unwrap();
        mgr.advance(ptr, 40).unwrap();
        let logno = ptr.log_number();
        assert_eq!(mgr.dirty_segment_range(logno).unwrap(), Some((0, 0)));

        // Straddle into segment 1.
        let ptr = mgr
            .allocate(&mut writer, 40, Persistence::Permanent)
            .unwrap();
        mgr.advance(ptr, 40).unwrap();
        assert_eq!(mgr.dirty_segment_range(logno).unwrap(), Some((0, 1)));

        mgr.set_highest_synced_segment(logno, 1).unwrap();
        assert_eq!(mgr.highest_synced_segment(logno).unwrap(), Some(1));
    }

    #[test]
    fn test_buffer_tag_uses_undo_database() {
        let tmp = TempDir::new().unwrap();
        let mgr = test_manager(tmp.path());
        let mut writer = UndoWriter::new();

        let ptr = mgr
            .allocate(&mut writer, 10, Persistence::Permanent)
            .unwrap();
        let (tablespace, db, relnode) = mgr.buffer_tag(ptr).unwrap();
        assert_eq!(tablespace, TablespaceId::DEFAULT);
        assert_eq!(db, tern_common::constants::UNDO_DATABASE_ID);
        assert_eq!(relnode, ptr.log_number().as_u32());
    }
}
