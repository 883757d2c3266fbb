//! ARIES recovery.
//!
//! [`RecoveryManager`] logs every change before it reaches a page,
//! keeps the transaction table and dirty page table, and rolls back
//! aborting transactions with compensation records. After a crash,
//! [`RecoveryManager::restart`] runs three passes over the log:
//!
//! 1. **Analysis** rebuilds both tables from the last checkpoint onward,
//!    re-locks the pages of unfinished transactions, ends committed ones
//!    and marks the rest for rollback.
//! 2. **Redo** repeats history from the oldest recLSN, skipping records
//!    already reflected in a page's pageLSN.
//! 3. **Undo** is returned as an [`UndoPhase`] and rolls the losers back
//!    in descending LSN order, then takes a checkpoint.

mod manager;
mod restart;
mod table;

#[cfg(test)]
pub(crate) mod fixture;

pub use manager::RecoveryManager;
pub use restart::UndoPhase;
pub use table::TransactionSummary;
