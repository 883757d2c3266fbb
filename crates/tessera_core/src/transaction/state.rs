//! Transaction status and the shared transaction handle.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Lifecycle status of a transaction.
///
/// Forward processing moves `Running -> Committing -> Complete` or
/// `Running -> Aborting -> Complete`. Transactions found unfinished during
/// restart are rolled back as `RecoveryAborting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Executing normally.
    Running = 0,
    /// Commit record written; waiting for the end record.
    Committing = 1,
    /// Abort record written; rollback happens at end.
    Aborting = 2,
    /// Being rolled back by restart recovery.
    RecoveryAborting = 3,
    /// Finished.
    Complete = 4,
}

impl TransactionStatus {
    /// Converts a byte to a status.
    pub fn from_byte(b: u8) -> CoreResult<Self> {
        match b {
            0 => Ok(Self::Running),
            1 => Ok(Self::Committing),
            2 => Ok(Self::Aborting),
            3 => Ok(Self::RecoveryAborting),
            4 => Ok(Self::Complete),
            other => Err(CoreError::log_corruption(format!(
                "unknown transaction status {other}"
            ))),
        }
    }

    /// Converts the status to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for both aborting states.
    #[must_use]
    pub const fn is_aborting(self) -> bool {
        matches!(self, Self::Aborting | Self::RecoveryAborting)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Committing => "committing",
            Self::Aborting => "aborting",
            Self::RecoveryAborting => "recovery-aborting",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Callback run once when a transaction is cleaned up.
pub type CleanupHook = Box<dyn FnOnce(TransactionId) + Send>;

/// Shared handle to a running transaction.
///
/// Blocking follows a two-step protocol: the lock manager calls
/// [`prepare_block`](Self::prepare_block) while it holds its critical
/// section, releases the section, then calls [`block`](Self::block). A
/// concurrent [`unblock`](Self::unblock) between the two steps is not lost.
pub struct TransactionContext {
    id: TransactionId,
    status: Mutex<TransactionStatus>,
    blocked: Mutex<bool>,
    wake: Condvar,
    cleanup: Mutex<Option<CleanupHook>>,
}

impl TransactionContext {
    /// Creates a running transaction with no cleanup hook.
    #[must_use]
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            status: Mutex::new(TransactionStatus::Running),
            blocked: Mutex::new(false),
            wake: Condvar::new(),
            cleanup: Mutex::new(None),
        }
    }

    /// Creates a running transaction that runs `hook` on cleanup.
    #[must_use]
    pub fn with_cleanup(id: TransactionId, hook: CleanupHook) -> Self {
        let txn = Self::new(id);
        *txn.cleanup.lock() = Some(hook);
        txn
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Replaces the status.
    pub fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }

    /// Marks the transaction as about to block.
    pub fn prepare_block(&self) {
        *self.blocked.lock() = true;
    }

    /// Parks the calling thread until [`unblock`](Self::unblock) is called.
    ///
    /// Returns immediately if the transaction was already unblocked.
    pub fn block(&self) {
        let mut blocked = self.blocked.lock();
        while *blocked {
            self.wake.wait(&mut blocked);
        }
    }

    /// Wakes the transaction.
    pub fn unblock(&self) {
        *self.blocked.lock() = false;
        self.wake.notify_all();
    }

    /// Returns true while the transaction waits for a lock.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        *self.blocked.lock()
    }

    /// Runs the cleanup hook. Later calls do nothing.
    pub fn cleanup(&self) {
        let hook = self.cleanup.lock().take();
        if let Some(hook) = hook {
            hook(self.id);
        }
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("blocked", &self.is_blocked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn status_byte_roundtrip() {
        for status in [
            TransactionStatus::Running,
            TransactionStatus::Committing,
            TransactionStatus::Aborting,
            TransactionStatus::RecoveryAborting,
            TransactionStatus::Complete,
        ] {
            assert_eq!(TransactionStatus::from_byte(status.as_byte()).unwrap(), status);
        }
        assert!(TransactionStatus::from_byte(9).is_err());
    }

    #[test]
    fn unblock_before_block_is_not_lost() {
        let txn = TransactionContext::new(TransactionId::new(1));
        txn.prepare_block();
        assert!(txn.is_blocked());
        txn.unblock();
        txn.block();
        assert!(!txn.is_blocked());
    }

    #[test]
    fn block_waits_for_unblock() {
        let txn = Arc::new(TransactionContext::new(TransactionId::new(2)));
        txn.prepare_block();

        let waiter = {
            let txn = Arc::clone(&txn);
            thread::spawn(move || txn.block())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        txn.unblock();
        waiter.join().unwrap();
    }

    #[test]
    fn cleanup_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let txn = TransactionContext::with_cleanup(
            TransactionId::new(3),
            Box::new(move |id| {
                assert_eq!(id, TransactionId::new(3));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        txn.cleanup();
        txn.cleanup();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
