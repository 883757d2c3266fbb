//! Restart recovery: analysis, redo and undo.

use super::table::TransactionTableEntry;
use super::RecoveryManager;
use crate::concurrency::{ensure_sufficient_lock_held, LockType};
use crate::error::{CoreError, CoreResult};
use crate::log::{LogRecord, LogRecordType};
use crate::transaction::{TransactionContext, TransactionStatus};
use crate::types::{Lsn, PageNum, TransactionId};
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Undo pass of a restart, returned by [`RecoveryManager::restart`].
///
/// Every loser transaction keeps its page locks until this runs, so new
/// transactions may be admitted before the rollback finishes.
#[must_use = "loser transactions are only rolled back by UndoPhase::run"]
pub struct UndoPhase<'a> {
    manager: &'a RecoveryManager,
}

impl UndoPhase<'_> {
    /// Transactions waiting to be rolled back.
    #[must_use]
    pub fn losers(&self) -> Vec<TransactionId> {
        let mut losers: Vec<TransactionId> = self
            .manager
            .table
            .lock()
            .iter()
            .filter(|(_, entry)| entry.transaction.status() == TransactionStatus::RecoveryAborting)
            .map(|(id, _)| *id)
            .collect();
        losers.sort();
        losers
    }

    /// Rolls back every loser and takes a checkpoint.
    ///
    /// Returns the LSN of the checkpoint's begin record.
    ///
    /// # Errors
    ///
    /// Returns log, buffer and disk errors, or
    /// [`CoreError::LogCorruption`] if an undo chain is broken.
    pub fn run(self) -> CoreResult<Lsn> {
        self.manager.undo()?;
        self.manager.checkpoint()
    }
}

impl std::fmt::Debug for UndoPhase<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoPhase")
            .field("losers", &self.losers())
            .finish()
    }
}

impl RecoveryManager {
    /// Recovers from a crash.
    ///
    /// Runs analysis and redo, then returns the undo pass for the caller to
    /// run. No transaction may start until this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] or
    /// [`CoreError::ChecksumMismatch`] for a damaged log, or the errors of
    /// the page cache and disk.
    pub fn restart(&self) -> CoreResult<UndoPhase<'_>> {
        self.analysis()?;
        self.redo()?;
        self.purge_dirty_pages();
        Ok(UndoPhase { manager: self })
    }

    fn analysis(&self) -> CoreResult<()> {
        let checkpoint = self.log.master_record()?;
        info!(checkpoint = %checkpoint, "restart: analysis");

        let mut ended = HashSet::new();
        let mut scanned = 0usize;
        for item in self.log.scan_from(checkpoint) {
            let (lsn, record) = item?;
            scanned += 1;
            match record {
                LogRecord::Master { .. } => {}
                LogRecord::BeginCheckpoint { txn_counter } => {
                    self.transactions.update_counter(txn_counter);
                }
                LogRecord::EndCheckpoint {
                    dirty_pages,
                    transactions,
                    touched_pages,
                } => self.merge_checkpoint(dirty_pages, &transactions, touched_pages, &ended)?,
                record => self.analyze_record(lsn, &record, &mut ended)?,
            }
        }

        self.finish_analysis()?;
        info!(
            scanned,
            transactions = self.table.lock().len(),
            dirty_pages = self.dirty_pages.lock().len(),
            "restart: analysis complete"
        );
        Ok(())
    }

    fn analyze_record(
        &self,
        lsn: Lsn,
        record: &LogRecord,
        ended: &mut HashSet<TransactionId>,
    ) -> CoreResult<()> {
        let Some(txn) = record.txn() else {
            return Ok(());
        };
        let transaction = {
            let mut table = self.table.lock();
            let entry = table
                .entry(txn)
                .or_insert_with(|| TransactionTableEntry::new(self.transactions.recovered(txn)));
            entry.last_lsn = Some(lsn);
            if let Some(page) = record.page_num() {
                entry.touched_pages.insert(page);
            }
            Arc::clone(&entry.transaction)
        };

        match record.record_type() {
            LogRecordType::Commit => transaction.set_status(TransactionStatus::Committing),
            LogRecordType::Abort => transaction.set_status(TransactionStatus::RecoveryAborting),
            LogRecordType::End => {
                self.table.lock().remove(&txn);
                ended.insert(txn);
                transaction.cleanup();
                transaction.set_status(TransactionStatus::Complete);
            }
            kind => {
                let Some(page) = record.page_num() else {
                    return Ok(());
                };
                self.dirty_pages.lock().entry(page).or_insert(lsn);
                self.lock_page(&transaction, page)?;
                if matches!(
                    kind,
                    LogRecordType::AllocPage
                        | LogRecordType::FreePage
                        | LogRecordType::UndoAllocPage
                        | LogRecordType::UndoFreePage
                ) {
                    self.log.flush_to_lsn(lsn)?;
                    self.dirty_pages.lock().remove(&page);
                }
            }
        }
        Ok(())
    }

    fn merge_checkpoint(
        &self,
        dirty_pages: BTreeMap<PageNum, Lsn>,
        transactions: &BTreeMap<TransactionId, (TransactionStatus, Option<Lsn>)>,
        touched_pages: BTreeMap<TransactionId, Vec<PageNum>>,
        ended: &HashSet<TransactionId>,
    ) -> CoreResult<()> {
        self.dirty_pages.lock().extend(dirty_pages);

        let mut to_lock = Vec::new();
        {
            let mut table = self.table.lock();
            for (txn, (status, last_lsn)) in transactions {
                if ended.contains(txn) {
                    continue;
                }
                if let Some(entry) = table.get_mut(txn) {
                    if status.is_aborting() {
                        entry.transaction.set_status(TransactionStatus::RecoveryAborting);
                    }
                    if *last_lsn > entry.last_lsn {
                        entry.last_lsn = *last_lsn;
                    }
                    continue;
                }
                let status = match status {
                    TransactionStatus::Complete => continue,
                    TransactionStatus::Aborting => TransactionStatus::RecoveryAborting,
                    other => *other,
                };
                let transaction = self.transactions.recovered(*txn);
                transaction.set_status(status);
                let mut entry = TransactionTableEntry::new(transaction);
                entry.last_lsn = *last_lsn;
                table.insert(*txn, entry);
            }

            for (txn, pages) in touched_pages {
                let Some(entry) = table.get_mut(&txn) else {
                    continue;
                };
                for page in pages {
                    entry.touched_pages.insert(page);
                    to_lock.push((Arc::clone(&entry.transaction), page));
                }
            }
        }

        for (transaction, page) in to_lock {
            self.lock_page(&transaction, page)?;
        }
        Ok(())
    }

    /// Ends committing transactions and marks running ones as losers.
    fn finish_analysis(&self) -> CoreResult<()> {
        let mut table = self.table.lock();
        let mut ids: Vec<TransactionId> = table.keys().copied().collect();
        ids.sort();

        for txn in ids {
            let Some(entry) = table.get_mut(&txn) else {
                continue;
            };
            match entry.transaction.status() {
                TransactionStatus::Committing => {
                    entry.transaction.cleanup();
                    entry.transaction.set_status(TransactionStatus::Complete);
                    self.log.append(&LogRecord::End {
                        txn,
                        prev_lsn: entry.last_lsn,
                    })?;
                    table.remove(&txn);
                    debug!(txn = %txn, "finished committed transaction");
                }
                TransactionStatus::Running => {
                    entry
                        .transaction
                        .set_status(TransactionStatus::RecoveryAborting);
                    let lsn = self.log.append(&LogRecord::Abort {
                        txn,
                        prev_lsn: entry.last_lsn,
                    })?;
                    entry.last_lsn = Some(lsn);
                    debug!(txn = %txn, "marked transaction for rollback");
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn redo(&self) -> CoreResult<()> {
        let start = self.dirty_pages.lock().values().min().copied();
        let Some(start) = start else {
            info!("restart: redo skipped, no dirty pages");
            return Ok(());
        };
        info!(from = %start, "restart: redo");

        let mut redone = 0usize;
        for item in self.log.scan_from(start) {
            let (lsn, record) = item?;
            if !record.is_redoable() {
                continue;
            }
            if record.partition().is_some() {
                record.redo(lsn, self.disk.as_ref(), self.buffer.as_ref())?;
                redone += 1;
                continue;
            }
            let Some(page) = record.page_num() else {
                continue;
            };
            let rec_lsn = self.dirty_pages.lock().get(&page).copied();
            match rec_lsn {
                Some(rec_lsn) if lsn >= rec_lsn => {}
                _ => {
                    trace!(lsn = %lsn, page = %page, "redo skipped, page not dirty");
                    continue;
                }
            }
            // An unallocated page carries no pageLSN.
            let page_lsn = if self.disk.is_page_allocated(page) {
                self.buffer.fetch_page(page)?.page_lsn()
            } else {
                None
            };
            if page_lsn >= Some(lsn) {
                trace!(lsn = %lsn, page = %page, "redo skipped, page is newer");
                continue;
            }
            record.redo(lsn, self.disk.as_ref(), self.buffer.as_ref())?;
            trace!(lsn = %lsn, kind = ?record.record_type(), "redone");
            redone += 1;
        }
        info!(redone, "restart: redo complete");
        Ok(())
    }

    /// Drops dirty-page entries for pages the cache holds clean.
    ///
    /// Pages that are not cached keep their entries.
    fn purge_dirty_pages(&self) {
        let mut clean = Vec::new();
        self.buffer.iter_page_nums(&mut |page, dirty| {
            if !dirty {
                clean.push(page);
            }
        });
        let mut dirty_pages = self.dirty_pages.lock();
        let before = dirty_pages.len();
        for page in &clean {
            dirty_pages.remove(page);
        }
        debug!(purged = before - dirty_pages.len(), "purged clean pages from dirty page table");
    }

    fn undo(&self) -> CoreResult<()> {
        let mut queue = BinaryHeap::new();
        let mut empty = Vec::new();
        for (txn, entry) in self.table.lock().iter() {
            if entry.transaction.status() != TransactionStatus::RecoveryAborting {
                continue;
            }
            match entry.last_lsn {
                Some(lsn) => queue.push((lsn, *txn)),
                None => empty.push(*txn),
            }
        }
        info!(losers = queue.len() + empty.len(), "restart: undo");

        for txn in empty {
            self.finish_rollback(txn)?;
        }

        let mut undone = 0usize;
        while let Some((lsn, txn)) = queue.pop() {
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
            match record.undo_chain_next() {
                Some(next) => queue.push((next, txn)),
                None => self.finish_rollback(txn)?,
            }
        }
        info!(undone, "restart: undo complete");
        Ok(())
    }

    fn finish_rollback(&self, txn: TransactionId) -> CoreResult<()> {
        let entry = self
            .table
            .lock()
            .remove(&txn)
            .ok_or(CoreError::TransactionNotFound { txn })?;
        self.log.append(&LogRecord::End {
            txn,
            prev_lsn: entry.last_lsn,
        })?;
        entry.transaction.cleanup();
        entry.transaction.set_status(TransactionStatus::Complete);
        debug!(txn = %txn, "rolled back loser transaction");
        Ok(())
    }

    fn lock_page(&self, transaction: &Arc<TransactionContext>, page: PageNum) -> CoreResult<()> {
        let context = self.page_lock_context(page);
        ensure_sufficient_lock_held(&context, Some(transaction), LockType::Exclusive)
    }
}
