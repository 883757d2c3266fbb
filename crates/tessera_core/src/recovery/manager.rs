//! Forward processing: logging, rollback and checkpoints.

use super::table::{TransactionSummary, TransactionTableEntry};
use crate::buffer::{BufferManager, DiskSpaceManager, WalHooks};
use crate::concurrency::LockContext;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::{fits_in_one_record, LogManager, LogRecord};
use crate::transaction::{TransactionContext, TransactionFactory, TransactionStatus};
use crate::types::{Lsn, PageNum, PartitionId, TransactionId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// ARIES recovery manager.
///
/// During forward processing every page write, allocation and status change
/// of a transaction is logged here before it takes effect. The manager
/// keeps the transaction table (lastLSN, touched pages, savepoints per
/// transaction) and the dirty page table (recLSN per page), and rolls
/// aborting transactions back with compensation records.
///
/// After a crash, [`restart`](Self::restart) rebuilds both tables from the
/// log, repeats history and returns an [`UndoPhase`](super::UndoPhase) that
/// rolls back the losers.
///
/// The table locks are never held while the page cache is called.
pub struct RecoveryManager {
    pub(super) db_context: LockContext,
    pub(super) log: Arc<LogManager>,
    pub(super) disk: Arc<dyn DiskSpaceManager>,
    pub(super) buffer: Arc<dyn BufferManager>,
    pub(super) transactions: Arc<dyn TransactionFactory>,
    pub(super) table: Mutex<HashMap<TransactionId, TransactionTableEntry>>,
    pub(super) dirty_pages: Mutex<HashMap<PageNum, Lsn>>,
    pub(super) config: Config,
}

impl RecoveryManager {
    /// Creates a recovery manager and registers it as the cache's WAL hooks.
    #[must_use]
    pub fn new(
        db_context: LockContext,
        log: Arc<LogManager>,
        disk: Arc<dyn DiskSpaceManager>,
        buffer: Arc<dyn BufferManager>,
        transactions: Arc<dyn TransactionFactory>,
        config: Config,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            db_context,
            log,
            disk,
            buffer,
            transactions,
            table: Mutex::new(HashMap::new()),
            dirty_pages: Mutex::new(HashMap::new()),
            config,
        });
        let hooks: Arc<dyn WalHooks> = Arc::clone(&manager) as Arc<dyn WalHooks>;
        manager.buffer.set_wal_hooks(Arc::downgrade(&hooks));
        manager
    }

    /// Sets up a brand-new database by taking the first checkpoint.
    ///
    /// # Errors
    ///
    /// Propagates log errors.
    pub fn initialize(&self) -> CoreResult<()> {
        self.checkpoint()?;
        Ok(())
    }

    /// Adds a transaction to the transaction table.
    pub fn start_transaction(&self, txn: &Arc<TransactionContext>) {
        self.table
            .lock()
            .insert(txn.id(), TransactionTableEntry::new(Arc::clone(txn)));
        trace!(txn = %txn.id(), "transaction started");
    }

    /// Logs the commit of `txn` and forces the log.
    ///
    /// The transaction is durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn commit(&self, txn: TransactionId) -> CoreResult<Lsn> {
        let lsn = self.with_entry(txn, |entry| {
            let lsn = self.log.append(&LogRecord::Commit {
                txn,
                prev_lsn: entry.last_lsn,
            })?;
            entry.last_lsn = Some(lsn);
            entry.transaction.set_status(TransactionStatus::Committing);
            Ok(lsn)
        })?;
        self.log.flush_to_lsn(lsn)?;
        debug!(txn = %txn, lsn = %lsn, "transaction committed");
        Ok(lsn)
    }

    /// Logs the abort of `txn`. Rollback happens in [`end`](Self::end).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn abort(&self, txn: TransactionId) -> CoreResult<Lsn> {
        let lsn = self.with_entry(txn, |entry| {
            let lsn = self.log.append(&LogRecord::Abort {
                txn,
                prev_lsn: entry.last_lsn,
            })?;
            entry.last_lsn = Some(lsn);
            entry.transaction.set_status(TransactionStatus::Aborting);
            Ok(lsn)
        })?;
        debug!(txn = %txn, lsn = %lsn, "transaction aborted");
        Ok(lsn)
    }

    /// Finishes `txn`: rolls it back if it is aborting, logs its end record
    /// and drops it from the transaction table.
    ///
    /// The transaction stays in the table until its end record is logged.
    /// If the rollback fails it is left aborting, chained to its last
    /// compensation record, for restart to finish. Releasing the
    /// transaction's locks is left to its cleanup hook.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or log, buffer and disk errors raised while rolling back.
    pub fn end(&self, txn: TransactionId) -> CoreResult<Lsn> {
        let aborting = self.with_entry(txn, |entry| {
            Ok(entry.transaction.status() == TransactionStatus::Aborting)
        })?;
        if aborting {
            self.rollback(txn, None)?;
        }

        let mut table = self.table.lock();
        let prev_lsn = table
            .get(&txn)
            .ok_or(CoreError::TransactionNotFound { txn })?
            .last_lsn;
        let lsn = self.log.append(&LogRecord::End { txn, prev_lsn })?;
        if let Some(entry) = table.remove(&txn) {
            entry.transaction.set_status(TransactionStatus::Complete);
        }
        drop(table);
        debug!(txn = %txn, lsn = %lsn, "transaction ended");
        Ok(lsn)
    }

    /// Logs a write of `after` over `before` at `offset` in `page`.
    ///
    /// Writes longer than [`Config::max_single_record_write`] are logged as
    /// an undo-only record followed by a redo-only record. Returns the LSN
    /// the page must be stamped with.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] if the images differ in length
    /// - [`CoreError::TransactionNotFound`] for unknown transactions
    pub fn log_page_write(
        &self,
        txn: TransactionId,
        page: PageNum,
        offset: u16,
        before: &[u8],
        after: &[u8],
    ) -> CoreResult<Lsn> {
        if before.len() != after.len() {
            return Err(CoreError::invalid_operation(format!(
                "before image is {} bytes but after image is {}",
                before.len(),
                after.len()
            )));
        }

        let split = before.len() > self.config.max_single_record_write();
        let lsn = self.with_entry(txn, |entry| {
            let lsn = if split {
                let undo_lsn = self.log.append(&LogRecord::UpdatePage {
                    txn,
                    prev_lsn: entry.last_lsn,
                    page,
                    offset,
                    before: Some(before.to_vec()),
                    after: None,
                })?;
                self.log.append(&LogRecord::UpdatePage {
                    txn,
                    prev_lsn: Some(undo_lsn),
                    page,
                    offset,
                    before: None,
                    after: Some(after.to_vec()),
                })?
            } else {
                self.log.append(&LogRecord::UpdatePage {
                    txn,
                    prev_lsn: entry.last_lsn,
                    page,
                    offset,
                    before: Some(before.to_vec()),
                    after: Some(after.to_vec()),
                })?
            };
            entry.last_lsn = Some(lsn);
            entry.touched_pages.insert(page);
            Ok(lsn)
        })?;

        self.dirty_pages.lock().entry(page).or_insert(lsn);
        trace!(txn = %txn, page = %page, lsn = %lsn, len = after.len(), split, "logged page write");
        Ok(lsn)
    }

    /// Logs a partition allocation and forces the log.
    ///
    /// Returns `None` for the log partition, which is never logged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn log_alloc_part(&self, txn: TransactionId, partition: PartitionId) -> CoreResult<Option<Lsn>> {
        if partition.is_log() {
            return Ok(None);
        }
        let lsn = self.append_forced(txn, None, |prev_lsn| LogRecord::AllocPart {
            txn,
            prev_lsn,
            partition,
        })?;
        Ok(Some(lsn))
    }

    /// Logs a partition deallocation and forces the log.
    ///
    /// Returns `None` for the log partition, which is never logged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn log_free_part(&self, txn: TransactionId, partition: PartitionId) -> CoreResult<Option<Lsn>> {
        if partition.is_log() {
            return Ok(None);
        }
        let lsn = self.append_forced(txn, None, |prev_lsn| LogRecord::FreePart {
            txn,
            prev_lsn,
            partition,
        })?;
        Ok(Some(lsn))
    }

    /// Logs a page allocation and forces the log.
    ///
    /// Returns `None` for pages of the log partition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn log_alloc_page(&self, txn: TransactionId, page: PageNum) -> CoreResult<Option<Lsn>> {
        if page.partition().is_log() {
            return Ok(None);
        }
        let lsn = self.append_forced(txn, Some(page), |prev_lsn| LogRecord::AllocPage {
            txn,
            prev_lsn,
            page,
        })?;
        Ok(Some(lsn))
    }

    /// Logs a page deallocation, forgets the page's dirty entry and forces
    /// the log.
    ///
    /// Returns `None` for pages of the log partition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions,
    /// or a log error.
    pub fn log_free_page(&self, txn: TransactionId, page: PageNum) -> CoreResult<Option<Lsn>> {
        if page.partition().is_log() {
            return Ok(None);
        }
        let lsn = self.append_forced(txn, Some(page), |prev_lsn| LogRecord::FreePage {
            txn,
            prev_lsn,
            page,
        })?;
        self.dirty_pages.lock().remove(&page);
        Ok(Some(lsn))
    }

    /// Records a savepoint at the transaction's current position, replacing
    /// any savepoint with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions.
    pub fn savepoint(&self, txn: TransactionId, name: &str) -> CoreResult<()> {
        self.with_entry(txn, |entry| {
            entry.add_savepoint(name);
            Ok(())
        })
    }

    /// Deletes a savepoint. Deleting one that does not exist does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] for unknown transactions.
    pub fn release_savepoint(&self, txn: TransactionId, name: &str) -> CoreResult<()> {
        self.with_entry(txn, |entry| {
            entry.delete_savepoint(name);
            Ok(())
        })
    }

    /// Undoes every change `txn` logged after the savepoint, newest first.
    ///
    /// The transaction's status is unchanged.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SavepointNotFound`] if no such savepoint exists
    /// - [`CoreError::TransactionNotFound`] for unknown transactions
    /// - log, buffer and disk errors raised while rolling back
    pub fn rollback_to_savepoint(&self, txn: TransactionId, name: &str) -> CoreResult<()> {
        let stop = self.with_entry(txn, |entry| {
            entry
                .savepoint(name)
                .ok_or_else(|| CoreError::SavepointNotFound {
                    txn,
                    name: name.to_string(),
                })
        })?;

        self.rollback(txn, stop)?;
        debug!(txn = %txn, savepoint = name, "rolled back to savepoint");
        Ok(())
    }

    /// Takes a fuzzy checkpoint and returns the LSN of its begin record.
    ///
    /// The dirty page table, the transaction table and the touched pages are
    /// packed into as many end-checkpoint records as
    /// [`Config::checkpoint_record_budget`] requires. The master record is
    /// repointed once they are durable.
    ///
    /// # Errors
    ///
    /// Propagates log errors.
    pub fn checkpoint(&self) -> CoreResult<Lsn> {
        let begin = self.log.append(&LogRecord::BeginCheckpoint {
            txn_counter: self.transactions.counter(),
        })?;

        let dirty: BTreeMap<PageNum, Lsn> = self
            .dirty_pages
            .lock()
            .iter()
            .map(|(page, lsn)| (*page, *lsn))
            .collect();
        let entries: BTreeMap<TransactionId, TransactionSummary> = self
            .table
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.summary()))
            .collect();

        let budget = self.config.checkpoint_record_budget;
        let mut chunk = CheckpointChunk::default();
        let mut records = 0usize;

        for (page, rec_lsn) in dirty {
            if !chunk.fits(1, 0, 0, 0, budget) {
                self.emit_chunk(&mut chunk)?;
                records += 1;
            }
            chunk.dirty_pages.insert(page, rec_lsn);
        }

        for (id, summary) in &entries {
            if !chunk.fits(0, 1, 0, 0, budget) {
                self.emit_chunk(&mut chunk)?;
                records += 1;
            }
            chunk
                .transactions
                .insert(*id, (summary.status, summary.last_lsn));
        }

        for (id, summary) in &entries {
            for page in &summary.touched_pages {
                let new_txn = usize::from(!chunk.touched_pages.contains_key(id));
                if !chunk.fits(0, 0, new_txn, 1, budget) {
                    self.emit_chunk(&mut chunk)?;
                    records += 1;
                }
                chunk.touched_pages.entry(*id).or_default().push(*page);
                chunk.num_touched += 1;
            }
        }

        let last = self.emit_chunk(&mut chunk)?;
        records += 1;
        self.log.flush_to_lsn(last)?;
        self.log.rewrite_master_record(begin)?;
        info!(begin = %begin, end_records = records, "checkpoint complete");
        Ok(begin)
    }

    /// Takes a final checkpoint and closes the log.
    ///
    /// # Errors
    ///
    /// Propagates log errors.
    pub fn close(&self) -> CoreResult<()> {
        self.checkpoint()?;
        self.log.close()
    }

    /// Returns a copy of the dirty page table.
    #[must_use]
    pub fn dirty_page_table(&self) -> BTreeMap<PageNum, Lsn> {
        self.dirty_pages
            .lock()
            .iter()
            .map(|(page, lsn)| (*page, *lsn))
            .collect()
    }

    /// Returns a snapshot of the transaction table.
    #[must_use]
    pub fn transaction_table(&self) -> BTreeMap<TransactionId, TransactionSummary> {
        self.table
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.summary()))
            .collect()
    }

    /// Returns the log.
    #[must_use]
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Returns the page cache.
    #[must_use]
    pub fn buffer(&self) -> &Arc<dyn BufferManager> {
        &self.buffer
    }

    /// Returns the disk space manager.
    #[must_use]
    pub fn disk(&self) -> &Arc<dyn DiskSpaceManager> {
        &self.disk
    }

    /// Returns the lock context of the whole database.
    #[must_use]
    pub fn db_context(&self) -> &LockContext {
        &self.db_context
    }

    /// Returns the lock context protecting `page`.
    #[must_use]
    pub fn page_lock_context(&self, page: PageNum) -> LockContext {
        self.db_context
            .child(u64::from(page.partition().as_u32()))
            .child(page.as_u64())
    }

    pub(super) fn with_entry<T>(
        &self,
        txn: TransactionId,
        f: impl FnOnce(&mut TransactionTableEntry) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut table = self.table.lock();
        let entry = table
            .get_mut(&txn)
            .ok_or(CoreError::TransactionNotFound { txn })?;
        f(entry)
    }

    /// Appends a record chained to the transaction and forces the log.
    fn append_forced(
        &self,
        txn: TransactionId,
        touched: Option<PageNum>,
        build: impl FnOnce(Option<Lsn>) -> LogRecord,
    ) -> CoreResult<Lsn> {
        let (lsn, kind) = self.with_entry(txn, |entry| {
            let record = build(entry.last_lsn);
            let lsn = self.log.append(&record)?;
            entry.last_lsn = Some(lsn);
            if let Some(page) = touched {
                entry.touched_pages.insert(page);
            }
            Ok((lsn, record.record_type()))
        })?;
        self.log.flush_to_lsn(lsn)?;
        trace!(txn = %txn, lsn = %lsn, kind = ?kind, "logged allocation");
        Ok(lsn)
    }

    /// Undoes the transaction's records from its last LSN back to, but not
    /// including, `stop` (or to the start of the chain).
    fn rollback(&self, txn: TransactionId, stop: Option<Lsn>) -> CoreResult<()> {
        let mut next = self.with_entry(txn, |entry| Ok(entry.last_lsn))?;
        let mut undone = 0usize;
        while let Some(lsn) = next {
            if stop.is_some_and(|stop| lsn <= stop) {
                break;
            }
            let record = self.log.fetch(lsn)?;
            if record.txn() != Some(txn) {
                return Err(CoreError::log_corruption(format!(
                    "record at {lsn} is not part of {txn}'s chain"
                )));
            }
            if record.is_undoable() {
                self.undo_record(txn, &record)?;
                undone += 1;
            }
            next = record.undo_chain_next();
        }
        debug!(txn = %txn, undone, "rolled back");
        Ok(())
    }

    /// Writes and applies the compensation record for `record`.
    ///
    /// The transaction's last LSN moves to the compensation record as soon
    /// as it is logged.
    pub(super) fn undo_record(&self, txn: TransactionId, record: &LogRecord) -> CoreResult<Lsn> {
        let (clr, clr_lsn, flush) = self.with_entry(txn, |entry| {
            let (clr, flush) = record.undo(entry.last_lsn)?;
            let clr_lsn = self.log.append(&clr)?;
            entry.last_lsn = Some(clr_lsn);
            Ok((clr, clr_lsn, flush))
        })?;
        if flush {
            self.log.flush_to_lsn(clr_lsn)?;
        }
        clr.redo(clr_lsn, self.disk.as_ref(), self.buffer.as_ref())?;

        let mut dirty = self.dirty_pages.lock();
        match &clr {
            LogRecord::UndoUpdatePage { page, .. } => {
                dirty.entry(*page).or_insert(clr_lsn);
            }
            LogRecord::UndoAllocPage { page, .. } | LogRecord::UndoFreePage { page, .. } => {
                dirty.remove(page);
            }
            _ => {}
        }
        trace!(lsn = %clr_lsn, kind = ?clr.record_type(), "applied compensation record");
        Ok(clr_lsn)
    }

    fn emit_chunk(&self, chunk: &mut CheckpointChunk) -> CoreResult<Lsn> {
        let record = LogRecord::EndCheckpoint {
            dirty_pages: std::mem::take(&mut chunk.dirty_pages),
            transactions: std::mem::take(&mut chunk.transactions),
            touched_pages: std::mem::take(&mut chunk.touched_pages),
        };
        chunk.num_touched = 0;
        self.log.append(&record)
    }
}

impl WalHooks for RecoveryManager {
    fn page_flush_hook(&self, page_lsn: Option<Lsn>) -> CoreResult<()> {
        match page_lsn {
            Some(lsn) => self.log.flush_to_lsn(lsn),
            None => Ok(()),
        }
    }

    fn disk_io_hook(&self, page: PageNum) {
        self.dirty_pages.lock().remove(&page);
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("transactions", &self.table.lock().len())
            .field("dirty_pages", &self.dirty_pages.lock().len())
            .finish_non_exhaustive()
    }
}

/// End-checkpoint contents being packed.
#[derive(Default)]
struct CheckpointChunk {
    dirty_pages: BTreeMap<PageNum, Lsn>,
    transactions: BTreeMap<TransactionId, (TransactionStatus, Option<Lsn>)>,
    touched_pages: BTreeMap<TransactionId, Vec<PageNum>>,
    num_touched: usize,
}

impl CheckpointChunk {
    fn is_empty(&self) -> bool {
        self.dirty_pages.is_empty() && self.transactions.is_empty() && self.touched_pages.is_empty()
    }

    /// Returns true if the chunk still fits after adding the given entries.
    /// An empty chunk always accepts one more entry.
    fn fits(&self, dpt: usize, txns: usize, touched_txns: usize, pages: usize, budget: usize) -> bool {
        self.is_empty()
            || fits_in_one_record(
                self.dirty_pages.len() + dpt,
                self.transactions.len() + txns,
                self.touched_pages.len() + touched_txns,
                self.num_touched + pages,
                budget,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogRecordType;
    use crate::recovery::fixture::{page, Harness, PAGE_SIZE};

    #[test]
    fn commit_forces_the_log() {
        let h = Harness::new();
        let txn = h.begin();
        h.alloc_page(txn.id(), page(0));
        let write_lsn = h.write(txn.id(), page(0), 0, b"hello");
        assert!(!h.rm.log().is_durable(write_lsn));

        let commit = h.rm.commit(txn.id()).unwrap();
        assert!(h.rm.log().is_durable(commit));
        assert_eq!(txn.status(), TransactionStatus::Committing);
        assert_eq!(
            h.rm.log().fetch(commit).unwrap(),
            LogRecord::Commit {
                txn: txn.id(),
                prev_lsn: Some(write_lsn),
            }
        );

        h.rm.end(txn.id()).unwrap();
        assert_eq!(txn.status(), TransactionStatus::Complete);
        assert!(h.rm.transaction_table().is_empty());
    }

    #[test]
    fn abort_does_not_force_the_log() {
        let h = Harness::new();
        let txn = h.begin();
        let lsn = h.rm.abort(txn.id()).unwrap();
        assert!(!h.rm.log().is_durable(lsn));
        assert_eq!(txn.status(), TransactionStatus::Aborting);
    }

    #[test]
    fn end_rolls_back_aborting_transactions() {
        let h = Harness::new();
        let setup = h.begin();
        h.alloc_page(setup.id(), page(0));
        h.rm.commit(setup.id()).unwrap();
        h.rm.end(setup.id()).unwrap();

        let txn = h.begin();
        let first = h.write(txn.id(), page(0), 0, b"aaaa");
        h.write(txn.id(), page(0), 2, b"bbbb");
        h.alloc_page(txn.id(), page(1));
        h.rm.abort(txn.id()).unwrap();
        let end = h.rm.end(txn.id()).unwrap();

        assert_eq!(h.read(page(0), 0, 6), vec![0; 6]);
        assert!(!h.disk.is_page_allocated(page(1)));
        assert_eq!(txn.status(), TransactionStatus::Complete);

        let kinds: Vec<LogRecordType> = h
            .rm
            .log()
            .scan_from(first)
            .map(|r| r.unwrap().1.record_type())
            .collect();
        assert_eq!(
            kinds,
            vec![
                LogRecordType::UpdatePage,
                LogRecordType::UpdatePage,
                LogRecordType::AllocPage,
                LogRecordType::Abort,
                LogRecordType::UndoAllocPage,
                LogRecordType::UndoUpdatePage,
                LogRecordType::UndoUpdatePage,
                LogRecordType::End,
            ]
        );
        assert!(matches!(
            h.rm.log().fetch(end).unwrap(),
            LogRecord::End { prev_lsn: Some(_), .. }
        ));
        assert!(h.rm.dirty_page_table().contains_key(&page(0)));
        assert!(!h.rm.dirty_page_table().contains_key(&page(1)));
    }

    #[test]
    fn large_writes_are_split() {
        let h = Harness::new();
        let txn = h.begin();
        h.alloc_page(txn.id(), page(0));
        let max = Config::default().page_size(PAGE_SIZE).max_single_record_write();

        let data = vec![7u8; max + 1];
        let lsn = h.write(txn.id(), page(0), 0, &data);
        let redo = h.rm.log().fetch(lsn).unwrap();
        let LogRecord::UpdatePage {
            before: None,
            after: Some(after),
            prev_lsn: Some(undo_lsn),
            ..
        } = redo
        else {
            panic!("expected redo-only record, got {redo:?}");
        };
        assert_eq!(after, data);
        assert!(matches!(
            h.rm.log().fetch(undo_lsn).unwrap(),
            LogRecord::UpdatePage {
                before: Some(_),
                after: None,
                ..
            }
        ));
        assert_eq!(h.rm.dirty_page_table().get(&page(0)), Some(&lsn));
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let h = Harness::new();
        let txn = h.begin();
        assert!(matches!(
            h.rm.log_page_write(txn.id(), page(0), 0, &[1, 2], &[1]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn log_partition_is_never_logged() {
        let h = Harness::new();
        let txn = h.begin();
        let before = h.rm.log().next_lsn();
        assert_eq!(h.rm.log_alloc_part(txn.id(), PartitionId::LOG).unwrap(), None);
        assert_eq!(
            h.rm
                .log_free_page(txn.id(), PageNum::new(PartitionId::LOG, 3))
                .unwrap(),
            None
        );
        assert_eq!(h.rm.log().next_lsn(), before);
    }

    #[test]
    fn allocations_are_forced_and_tracked() {
        let h = Harness::new();
        let txn = h.begin();
        h.alloc_page(txn.id(), page(4));
        h.write(txn.id(), page(4), 0, b"x");
        assert!(h.rm.dirty_page_table().contains_key(&page(4)));

        let lsn = h.rm.log_free_page(txn.id(), page(4)).unwrap().unwrap();
        assert!(h.rm.log().is_durable(lsn));
        assert!(!h.rm.dirty_page_table().contains_key(&page(4)));

        let table = h.rm.transaction_table();
        let summary = &table[&txn.id()];
        assert_eq!(summary.last_lsn, Some(lsn));
        assert_eq!(summary.touched_pages, vec![page(4)]);
    }

    #[test]
    fn rollback_to_savepoint_keeps_earlier_work() {
        let h = Harness::new();
        let txn = h.begin();
        h.alloc_page(txn.id(), page(0));
        h.write(txn.id(), page(0), 0, b"keep");
        h.rm.savepoint(txn.id(), "sp").unwrap();
        h.write(txn.id(), page(0), 4, b"drop");
        h.write(txn.id(), page(0), 0, b"KEEP");

        h.rm.rollback_to_savepoint(txn.id(), "sp").unwrap();
        assert_eq!(h.read(page(0), 0, 8), b"keep\0\0\0\0".to_vec());
        assert_eq!(txn.status(), TransactionStatus::Running);

        let last = h.rm.transaction_table()[&txn.id()].last_lsn.unwrap();
        assert!(matches!(
            h.rm.log().fetch(last).unwrap(),
            LogRecord::UndoUpdatePage { .. }
        ));

        // Aborting afterwards undoes the rest exactly once.
        h.rm.abort(txn.id()).unwrap();
        h.rm.end(txn.id()).unwrap();
        assert!(!h.disk.is_page_allocated(page(0)));
        assert!(!h.disk.is_part_allocated(PartitionId::new(1)));
    }

    #[test]
    fn savepoint_errors() {
        let h = Harness::new();
        let txn = h.begin();
        h.rm.release_savepoint(txn.id(), "nope").unwrap();
        assert!(matches!(
            h.rm.rollback_to_savepoint(txn.id(), "nope"),
            Err(CoreError::SavepointNotFound { .. })
        ));
    }

    #[test]
    fn unknown_transactions_are_fatal() {
        let h = Harness::new();
        let err = h.rm.commit(TransactionId::new(99)).unwrap_err();
        assert!(matches!(err, CoreError::TransactionNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn checkpoint_splits_across_records() {
        let h = Harness::with_config(
            Config::default()
                .page_size(PAGE_SIZE)
                .checkpoint_record_budget(60),
        );
        let txn = h.begin();
        for i in 0..4 {
            h.alloc_page(txn.id(), page(i));
            h.write(txn.id(), page(i), 0, b"z");
        }

        let begin_lsn = h.rm.checkpoint().unwrap();
        assert_eq!(h.rm.log().master_record().unwrap(), begin_lsn);

        let mut dirty = BTreeMap::new();
        let mut touched = Vec::new();
        let mut end_records = 0;
        for item in h.rm.log().scan_from(begin_lsn) {
            if let (_, LogRecord::EndCheckpoint {
                dirty_pages,
                touched_pages,
                ..
            }) = item.unwrap()
            {
                end_records += 1;
                dirty.extend(dirty_pages);
                touched.extend(touched_pages.into_values().flatten());
            }
        }
        assert!(end_records > 1);
        assert_eq!(dirty, h.rm.dirty_page_table());
        assert_eq!(touched, (0..4).map(page).collect::<Vec<_>>());
    }

    #[test]
    fn page_flush_forces_log_and_cleans_dpt() {
        let h = Harness::new();
        let txn = h.begin();
        h.alloc_page(txn.id(), page(0));
        let lsn = h.write(txn.id(), page(0), 0, b"data");
        assert!(!h.rm.log().is_durable(lsn));

        h.rm.buffer().flush_page(page(0)).unwrap();
        assert!(h.rm.log().is_durable(lsn));
        assert!(h.rm.dirty_page_table().is_empty());
    }

    #[test]
    fn failed_rollback_leaves_transaction_for_restart() {
        let h = Harness::new();
        h.setup_pages(&[page(0)]);
        let txn = h.begin();
        h.write(txn.id(), page(0), 0, b"xxxx");
        h.rm.abort(txn.id()).unwrap();
        // Freed without logging, so the compensation record cannot be applied.
        h.rm.buffer().free_page(page(0)).unwrap();

        let clr = h.rm.log().next_lsn();
        assert!(h.rm.end(txn.id()).is_err());
        let table = h.rm.transaction_table();
        assert_eq!(table[&txn.id()].status, TransactionStatus::Aborting);
        assert_eq!(table[&txn.id()].last_lsn, Some(clr));
        assert!(matches!(
            h.rm.log().fetch(clr).unwrap(),
            LogRecord::UndoUpdatePage { .. }
        ));

        h.disk.alloc_page(page(0)).unwrap();
        h.flush_log();
        let h = h.crash();
        let resume = h.rm.log().next_lsn();
        let undo = h.rm.restart().unwrap();
        assert_eq!(undo.losers(), vec![txn.id()]);
        undo.run().unwrap();

        assert!(h.rm.transaction_table().is_empty());
        assert_eq!(h.read(page(0), 0, 4), vec![0; 4]);
        let compensations = h
            .rm
            .log()
            .scan_from(resume)
            .filter(|item| matches!(item, Ok((_, LogRecord::UndoUpdatePage { .. }))))
            .count();
        assert_eq!(compensations, 0);
    }
}
