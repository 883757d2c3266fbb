//! Transaction id allocation.

use super::state::TransactionContext;
use crate::concurrency::LockManager;
use crate::types::TransactionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of transaction handles for the recovery manager.
///
/// Restart needs to materialize handles for transactions it finds in the
/// log and to keep the id counter ahead of every id already used.
pub trait TransactionFactory: Send + Sync {
    /// Builds a handle for a transaction found in the log.
    fn recovered(&self, id: TransactionId) -> Arc<TransactionContext>;

    /// Returns the next id that would be handed out.
    fn counter(&self) -> u64;

    /// Raises the counter to at least `observed`.
    fn update_counter(&self, observed: u64);
}

/// Hands out transaction handles whose cleanup releases every lock they hold.
pub struct TransactionManager {
    locks: Arc<LockManager>,
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager whose first transaction id is 1.
    #[must_use]
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self::with_counter(locks, 1)
    }

    /// Creates a manager whose next transaction id is `next_txid`.
    #[must_use]
    pub fn with_counter(locks: Arc<LockManager>, next_txid: u64) -> Self {
        Self {
            locks,
            next_txid: AtomicU64::new(next_txid),
        }
    }

    /// Starts a new transaction with a fresh id.
    pub fn begin(&self) -> Arc<TransactionContext> {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.handle(id)
    }

    fn handle(&self, id: TransactionId) -> Arc<TransactionContext> {
        let locks = Arc::clone(&self.locks);
        Arc::new(TransactionContext::with_cleanup(
            id,
            Box::new(move |id| locks.release_all(id)),
        ))
    }
}

impl TransactionFactory for TransactionManager {
    fn recovered(&self, id: TransactionId) -> Arc<TransactionContext> {
        self.update_counter(id.as_u64() + 1);
        self.handle(id)
    }

    fn counter(&self) -> u64 {
        self.next_txid.load(Ordering::SeqCst)
    }

    fn update_counter(&self, observed: u64) {
        self.next_txid.fetch_max(observed, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.counter())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::LockType;

    #[test]
    fn ids_are_monotonic() {
        let manager = TransactionManager::new(Arc::new(LockManager::new()));
        let a = manager.begin();
        let b = manager.begin();
        assert!(b.id() > a.id());
        assert_eq!(manager.counter(), 3);
    }

    #[test]
    fn counter_only_moves_forward() {
        let manager = TransactionManager::new(Arc::new(LockManager::new()));
        manager.update_counter(10);
        manager.update_counter(4);
        assert_eq!(manager.counter(), 10);

        let recovered = manager.recovered(TransactionId::new(42));
        assert_eq!(recovered.id(), TransactionId::new(42));
        assert_eq!(manager.counter(), 43);
        assert_eq!(manager.begin().id(), TransactionId::new(43));
    }

    #[test]
    fn cleanup_releases_locks() {
        let locks = Arc::new(LockManager::new());
        let manager = TransactionManager::new(Arc::clone(&locks));
        let txn = manager.begin();

        let db = locks.database_context();
        db.acquire(&txn, LockType::IntentExclusive).unwrap();
        db.child(1).acquire(&txn, LockType::Exclusive).unwrap();
        assert_eq!(locks.locks_for(txn.id()).len(), 2);

        txn.cleanup();
        assert!(locks.locks_for(txn.id()).is_empty());
        assert_eq!(db.num_child_locks(txn.id()), 0);
    }
}
