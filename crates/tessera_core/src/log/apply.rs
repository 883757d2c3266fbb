//! Undo and redo of log records.

use super::record::LogRecord;
use crate::buffer::{BufferManager, DiskSpaceManager};
use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;

impl LogRecord {
    /// Builds the compensation record that rolls this record back.
    ///
    /// `last_lsn` is the transaction's current last record, which the
    /// compensation record chains to. Returns the record and whether the log
    /// must be flushed up to it before it is applied.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the record is not undoable.
    pub fn undo(&self, last_lsn: Option<Lsn>) -> CoreResult<(LogRecord, bool)> {
        let undo_next_lsn = self.prev_lsn();
        let prev_lsn = last_lsn;
        let clr = match self {
            Self::AllocPart { txn, partition, .. } => Self::UndoAllocPart {
                txn: *txn,
                prev_lsn,
                partition: *partition,
                undo_next_lsn,
            },
            Self::FreePart { txn, partition, .. } => Self::UndoFreePart {
                txn: *txn,
                prev_lsn,
                partition: *partition,
                undo_next_lsn,
            },
            Self::AllocPage { txn, page, .. } => Self::UndoAllocPage {
                txn: *txn,
                prev_lsn,
                page: *page,
                undo_next_lsn,
            },
            Self::FreePage { txn, page, .. } => Self::UndoFreePage {
                txn: *txn,
                prev_lsn,
                page: *page,
                undo_next_lsn,
            },
            Self::UpdatePage {
                txn,
                page,
                offset,
                before: Some(before),
                ..
            } => {
                let clr = Self::UndoUpdatePage {
                    txn: *txn,
                    prev_lsn,
                    page: *page,
                    offset: *offset,
                    after: before.clone(),
                    undo_next_lsn,
                };
                return Ok((clr, false));
            }
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "{:?} record cannot be undone",
                    other.record_type()
                )))
            }
        };
        Ok((clr, true))
    }

    /// Applies the record, stamped with `lsn`, to disk and cache state.
    ///
    /// Allocation records only act when the target is in the opposite
    /// state, so replaying them is harmless. Page updates write their bytes
    /// and set the pageLSN.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the record is not
    /// redoable, or propagates buffer and disk errors.
    pub fn redo(
        &self,
        lsn: Lsn,
        disk: &dyn DiskSpaceManager,
        buffer: &dyn BufferManager,
    ) -> CoreResult<()> {
        match self {
            Self::AllocPart { partition, .. } | Self::UndoFreePart { partition, .. } => {
                if !disk.is_part_allocated(*partition) {
                    disk.alloc_part(*partition)?;
                }
            }
            Self::FreePart { partition, .. } | Self::UndoAllocPart { partition, .. } => {
                if disk.is_part_allocated(*partition) {
                    buffer.free_part(*partition)?;
                }
            }
            Self::AllocPage { page, .. } | Self::UndoFreePage { page, .. } => {
                if !disk.is_page_allocated(*page) {
                    disk.alloc_page(*page)?;
                }
            }
            Self::FreePage { page, .. } | Self::UndoAllocPage { page, .. } => {
                if disk.is_page_allocated(*page) {
                    buffer.free_page(*page)?;
                }
            }
            Self::UpdatePage {
                page,
                offset,
                after: Some(after),
                ..
            }
            | Self::UndoUpdatePage {
                page,
                offset,
                after,
                ..
            } => {
                let handle = buffer.fetch_page(*page)?;
                handle.write(usize::from(*offset), after)?;
                handle.set_page_lsn(lsn);
            }
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "{:?} record cannot be redone",
                    other.record_type()
                )))
            }
        }
        Ok(())
    }
}
