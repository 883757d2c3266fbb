//! Per-resource lock state, wait queues and the blocking protocol.

use super::context::{ContextArena, LockContext};
use super::lock_type::LockType;
use super::resource::{Lock, ResourceName};
use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionContext;
use crate::types::TransactionId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A request parked in a resource's wait queue.
struct LockRequest {
    txn: Arc<TransactionContext>,
    lock: Lock,
    /// Locks released atomically with the grant.
    release: Vec<ResourceName>,
}

#[derive(Default)]
struct ResourceEntry {
    /// Granted locks in acquisition order.
    granted: Vec<Lock>,
    queue: VecDeque<LockRequest>,
}

impl ResourceEntry {
    /// Checks `lock_type` against every grant not owned by `except`.
    fn is_compatible(&self, lock_type: LockType, except: TransactionId) -> bool {
        self.granted
            .iter()
            .all(|l| l.txn == except || LockType::compatible(l.lock_type, lock_type))
    }

    fn lock_type_of(&self, txn: TransactionId) -> LockType {
        self.granted
            .iter()
            .find(|l| l.txn == txn)
            .map_or(LockType::NoLock, |l| l.lock_type)
    }

    fn is_idle(&self) -> bool {
        self.granted.is_empty() && self.queue.is_empty()
    }
}

#[derive(Default)]
struct LockTable {
    resources: HashMap<ResourceName, ResourceEntry>,
    /// Locks held by each transaction in acquisition order.
    by_txn: HashMap<TransactionId, Vec<Lock>>,
}

impl LockTable {
    fn lock_type(&self, txn: TransactionId, name: &ResourceName) -> LockType {
        self.resources
            .get(name)
            .map_or(LockType::NoLock, |e| e.lock_type_of(txn))
    }

    /// Grants `lock`, replacing the mode in place if the transaction already
    /// holds a lock on the resource so its acquisition order is kept.
    fn grant(&mut self, lock: Lock) {
        let entry = self.resources.entry(lock.name.clone()).or_default();
        match entry.granted.iter_mut().find(|l| l.txn == lock.txn) {
            Some(held) => held.lock_type = lock.lock_type,
            None => entry.granted.push(lock.clone()),
        }

        let held = self.by_txn.entry(lock.txn).or_default();
        match held.iter_mut().find(|l| l.name == lock.name) {
            Some(existing) => existing.lock_type = lock.lock_type,
            None => held.push(lock),
        }
    }

    /// Drops the lock and runs the resource's queue. Returns false if the
    /// transaction held nothing on `name`.
    fn release(&mut self, txn: TransactionId, name: &ResourceName) -> bool {
        let Some(entry) = self.resources.get_mut(name) else {
            return false;
        };
        let Some(pos) = entry.granted.iter().position(|l| l.txn == txn) else {
            return false;
        };
        entry.granted.remove(pos);

        if let Some(held) = self.by_txn.get_mut(&txn) {
            held.retain(|l| &l.name != name);
            if held.is_empty() {
                self.by_txn.remove(&txn);
            }
        }

        self.process_queue(name);
        if self.resources.get(name).is_some_and(ResourceEntry::is_idle) {
            self.resources.remove(name);
        }
        true
    }

    /// Grants queued requests front to back, stopping at the first one that
    /// is still incompatible.
    fn process_queue(&mut self, name: &ResourceName) {
        loop {
            let Some(entry) = self.resources.get_mut(name) else {
                return;
            };
            let ready = entry
                .queue
                .front()
                .is_some_and(|front| entry.is_compatible(front.lock.lock_type, front.lock.txn));
            if !ready {
                return;
            }
            let Some(request) = entry.queue.pop_front() else {
                return;
            };

            let txn = request.txn.id();
            self.grant(request.lock.clone());
            for other in &request.release {
                if other != &request.lock.name {
                    self.release(txn, other);
                }
            }
            debug!(
                txn = %txn,
                resource = %request.lock.name,
                lock = %request.lock.lock_type,
                "queued lock request granted"
            );
            request.txn.unblock();
        }
    }

    fn enqueue(&mut self, request: LockRequest, front: bool) {
        debug!(
            txn = %request.lock.txn,
            resource = %request.lock.name,
            lock = %request.lock.lock_type,
            front,
            "lock request queued"
        );
        request.txn.prepare_block();
        let entry = self.resources.entry(request.lock.name.clone()).or_default();
        if front {
            entry.queue.push_front(request);
        } else {
            entry.queue.push_back(request);
        }
    }

    fn is_compatible(&self, name: &ResourceName, lock_type: LockType, txn: TransactionId) -> bool {
        self.resources
            .get(name)
            .map_or(true, |e| e.is_compatible(lock_type, txn))
    }

    fn queue_is_empty(&self, name: &ResourceName) -> bool {
        self.resources.get(name).map_or(true, |e| e.queue.is_empty())
    }
}

/// Grants, queues and releases locks on opaque resource names.
///
/// Every state transition happens inside one critical section. A request
/// that cannot be granted is queued inside the section and the caller parks
/// after leaving it, so other resources stay available while it waits.
/// There is no timeout and no deadlock detection.
pub struct LockManager {
    table: Mutex<LockTable>,
    contexts: Mutex<ContextArena>,
}

impl LockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            contexts: Mutex::new(ContextArena::default()),
        }
    }

    /// Acquires a `lock_type` lock on `name`.
    ///
    /// The lock is granted immediately only if it is compatible with every
    /// other transaction's lock and nobody is queued on `name`. Otherwise the
    /// request joins the back of the queue and the caller blocks.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateLock`] if the transaction already holds a lock
    ///   on `name`
    /// - [`CoreError::InvalidLock`] if `lock_type` is `NL`
    pub fn acquire(
        &self,
        txn: &Arc<TransactionContext>,
        name: &ResourceName,
        lock_type: LockType,
    ) -> CoreResult<()> {
        if lock_type == LockType::NoLock {
            return Err(CoreError::invalid_lock(format!("cannot acquire NL on {name}")));
        }

        let should_block = {
            let mut table = self.table.lock();
            let id = txn.id();
            if table.lock_type(id, name) != LockType::NoLock {
                return Err(CoreError::DuplicateLock {
                    txn: id,
                    name: name.clone(),
                });
            }

            let lock = Lock::new(name.clone(), lock_type, id);
            if table.queue_is_empty(name) && table.is_compatible(name, lock_type, id) {
                table.grant(lock);
                false
            } else {
                table.enqueue(LockRequest::new(txn, lock, Vec::new()), false);
                true
            }
        };

        if should_block {
            txn.block();
        }
        Ok(())
    }

    /// Releases the transaction's lock on `name` and runs its wait queue.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoLockHeld`] if the transaction holds no lock on
    /// `name`.
    pub fn release(&self, txn: &TransactionContext, name: &ResourceName) -> CoreResult<()> {
        let mut table = self.table.lock();
        if table.release(txn.id(), name) {
            Ok(())
        } else {
            Err(CoreError::NoLockHeld {
                txn: txn.id(),
                name: name.clone(),
            })
        }
    }

    /// Upgrades the transaction's lock on `name` to `new_type`.
    ///
    /// A promotion that must wait goes to the front of the queue. The lock
    /// keeps its original place in the acquisition order.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateLock`] if the lock already has `new_type`
    /// - [`CoreError::NoLockHeld`] if there is no lock to promote
    /// - [`CoreError::InvalidLock`] if `new_type` does not strictly
    ///   substitute the held mode
    pub fn promote(
        &self,
        txn: &Arc<TransactionContext>,
        name: &ResourceName,
        new_type: LockType,
    ) -> CoreResult<()> {
        let should_block = {
            let mut table = self.table.lock();
            let id = txn.id();
            let held = table.lock_type(id, name);
            if held == new_type {
                return Err(CoreError::DuplicateLock {
                    txn: id,
                    name: name.clone(),
                });
            }
            if held == LockType::NoLock {
                return Err(CoreError::NoLockHeld {
                    txn: id,
                    name: name.clone(),
                });
            }
            if !LockType::substitutable(new_type, held) {
                return Err(CoreError::invalid_lock(format!(
                    "{new_type} does not substitute {held} on {name}"
                )));
            }

            let lock = Lock::new(name.clone(), new_type, id);
            if table.is_compatible(name, new_type, id) {
                table.grant(lock);
                false
            } else {
                table.enqueue(LockRequest::new(txn, lock, Vec::new()), true);
                true
            }
        };

        if should_block {
            txn.block();
        }
        Ok(())
    }

    /// Grants `lock_type` on `name` and releases every lock in `release` as
    /// one atomic step.
    ///
    /// If `name` is itself in `release`, its lock is replaced in place and
    /// keeps its acquisition order. A request that must wait goes to the
    /// front of the queue carrying its release set.
    ///
    /// # Errors
    ///
    /// Both checks run before anything changes:
    /// - [`CoreError::DuplicateLock`] if a lock on `name` is held and `name`
    ///   is not being released
    /// - [`CoreError::NoLockHeld`] if any name in `release` is not held
    pub fn acquire_and_release(
        &self,
        txn: &Arc<TransactionContext>,
        name: &ResourceName,
        lock_type: LockType,
        release: &[ResourceName],
    ) -> CoreResult<()> {
        let should_block = {
            let mut table = self.table.lock();
            let id = txn.id();
            if table.lock_type(id, name) != LockType::NoLock && !release.contains(name) {
                return Err(CoreError::DuplicateLock {
                    txn: id,
                    name: name.clone(),
                });
            }
            if let Some(missing) = release
                .iter()
                .find(|r| table.lock_type(id, r) == LockType::NoLock)
            {
                return Err(CoreError::NoLockHeld {
                    txn: id,
                    name: missing.clone(),
                });
            }

            let lock = Lock::new(name.clone(), lock_type, id);
            if table.is_compatible(name, lock_type, id) {
                table.grant(lock);
                for other in release.iter().filter(|r| *r != name) {
                    table.release(id, other);
                }
                false
            } else {
                table.enqueue(LockRequest::new(txn, lock, release.to_vec()), true);
                true
            }
        };

        if should_block {
            txn.block();
        }
        Ok(())
    }

    /// Releases every lock the transaction holds, newest first, and forgets
    /// its descendant-lock counters.
    pub fn release_all(&self, txn: TransactionId) {
        {
            let mut table = self.table.lock();
            let held: Vec<ResourceName> = table
                .by_txn
                .get(&txn)
                .map(|locks| locks.iter().rev().map(|l| l.name.clone()).collect())
                .unwrap_or_default();
            for name in &held {
                table.release(txn, name);
            }
            debug!(txn = %txn, released = held.len(), "released all locks");
        }
        self.arena().forget_transaction(txn);
    }

    /// Returns the mode the transaction holds on `name`, or `NL`.
    #[must_use]
    pub fn lock_type(&self, txn: TransactionId, name: &ResourceName) -> LockType {
        self.table.lock().lock_type(txn, name)
    }

    /// Returns the locks granted on `name` in acquisition order.
    #[must_use]
    pub fn locks_on(&self, name: &ResourceName) -> Vec<Lock> {
        self.table
            .lock()
            .resources
            .get(name)
            .map(|e| e.granted.clone())
            .unwrap_or_default()
    }

    /// Returns the locks held by the transaction in acquisition order.
    #[must_use]
    pub fn locks_for(&self, txn: TransactionId) -> Vec<Lock> {
        self.table
            .lock()
            .by_txn
            .get(&txn)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the requested locks waiting on `name`, front first.
    #[must_use]
    pub fn queued_on(&self, name: &ResourceName) -> Vec<Lock> {
        self.table
            .lock()
            .resources
            .get(name)
            .map(|e| e.queue.iter().map(|r| r.lock.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the root context for a top-level resource, creating it once.
    pub fn context(self: &Arc<Self>, label: &str, id: u64) -> LockContext {
        let ctx = self.arena().root(label, id);
        LockContext::new(Arc::clone(self), ctx)
    }

    /// Returns the context of the whole database.
    pub fn database_context(self: &Arc<Self>) -> LockContext {
        self.context("database", 0)
    }

    pub(crate) fn arena(&self) -> MutexGuard<'_, ContextArena> {
        self.contexts.lock()
    }
}

impl LockRequest {
    fn new(txn: &Arc<TransactionContext>, lock: Lock, release: Vec<ResourceName>) -> Self {
        Self {
            txn: Arc::clone(txn),
            lock,
            release,
        }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("LockManager")
            .field("resources", &table.resources.len())
            .field("transactions", &table.by_txn.len())
            .finish_non_exhaustive()
    }
}
