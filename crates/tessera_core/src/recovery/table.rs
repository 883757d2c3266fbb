//! Transaction table entries.

use crate::transaction::{TransactionContext, TransactionStatus};
use crate::types::{Lsn, PageNum};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Recovery bookkeeping for one active or recovering transaction.
pub(crate) struct TransactionTableEntry {
    pub(crate) transaction: Arc<TransactionContext>,
    /// Most recent record of the transaction, `None` before its first.
    pub(crate) last_lsn: Option<Lsn>,
    pub(crate) touched_pages: HashSet<PageNum>,
    savepoints: HashMap<String, Option<Lsn>>,
}

impl TransactionTableEntry {
    pub(crate) fn new(transaction: Arc<TransactionContext>) -> Self {
        Self {
            transaction,
            last_lsn: None,
            touched_pages: HashSet::new(),
            savepoints: HashMap::new(),
        }
    }

    /// Records a savepoint at the current last LSN, replacing one with the
    /// same name.
    pub(crate) fn add_savepoint(&mut self, name: &str) {
        self.savepoints.insert(name.to_string(), self.last_lsn);
    }

    pub(crate) fn delete_savepoint(&mut self, name: &str) {
        self.savepoints.remove(name);
    }

    /// Returns the LSN captured by the savepoint, if it exists.
    pub(crate) fn savepoint(&self, name: &str) -> Option<Option<Lsn>> {
        self.savepoints.get(name).copied()
    }

    pub(crate) fn summary(&self) -> TransactionSummary {
        let mut touched_pages: Vec<PageNum> = self.touched_pages.iter().copied().collect();
        touched_pages.sort();
        TransactionSummary {
            status: self.transaction.status(),
            last_lsn: self.last_lsn,
            touched_pages,
        }
    }
}

/// Snapshot of a transaction-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    /// Status of the transaction.
    pub status: TransactionStatus,
    /// Most recent record of the transaction.
    pub last_lsn: Option<Lsn>,
    /// Pages the transaction has written, allocated or freed, in order.
    pub touched_pages: Vec<PageNum>,
}
