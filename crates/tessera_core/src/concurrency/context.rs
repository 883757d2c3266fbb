//! The lock context tree: multigranularity rules over the lock manager.
//!
//! Contexts live in an arena owned by the [`LockManager`] and refer to each
//! other by [`ContextId`]. A [`LockContext`] is a cheap handle: the manager,
//! a node id and the node's resource name.

use super::lock_type::LockType;
use super::manager::LockManager;
use super::resource::{Lock, ResourceName};
use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionContext;
use crate::types::TransactionId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of a node in the context arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

pub(crate) struct ContextNode {
    name: ResourceName,
    parent: Option<ContextId>,
    children: HashMap<u64, ContextId>,
    /// Locks each transaction holds on strict descendants.
    num_child_locks: HashMap<TransactionId, usize>,
    capacity: Option<usize>,
    readonly: bool,
    child_locks_disabled: bool,
    auto_escalate: bool,
    /// Label was derived from the id and may be replaced by a real one.
    default_label: bool,
}

impl ContextNode {
    fn new(name: ResourceName, parent: Option<ContextId>, readonly: bool) -> Self {
        Self {
            name,
            parent,
            children: HashMap::new(),
            num_child_locks: HashMap::new(),
            capacity: None,
            readonly,
            child_locks_disabled: readonly,
            auto_escalate: false,
            default_label: false,
        }
    }
}

#[derive(Default)]
pub(crate) struct ContextArena {
    nodes: Vec<ContextNode>,
    roots: HashMap<u64, ContextId>,
}

impl ContextArena {
    fn push(&mut self, node: ContextNode) -> ContextId {
        self.nodes.push(node);
        ContextId(self.nodes.len() - 1)
    }

    fn node(&self, id: ContextId) -> &ContextNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: ContextId) -> &mut ContextNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn root(&mut self, label: &str, id: u64) -> ContextId {
        if let Some(&ctx) = self.roots.get(&id) {
            return ctx;
        }
        let ctx = self.push(ContextNode::new(ResourceName::root(label, id), None, false));
        self.roots.insert(id, ctx);
        ctx
    }

    fn child(&mut self, parent: ContextId, label: Option<&str>, id: u64) -> ContextId {
        if let Some(&ctx) = self.node(parent).children.get(&id) {
            if let Some(label) = label {
                if self.node(ctx).default_label {
                    let name = self.node(parent).name.child(label, id);
                    let node = self.node_mut(ctx);
                    node.name = name;
                    node.default_label = false;
                }
            }
            return ctx;
        }

        let parent_node = self.node(parent);
        let readonly = parent_node.readonly || parent_node.child_locks_disabled;
        let name = match label {
            Some(label) => parent_node.name.child(label, id),
            None => parent_node.name.child(id.to_string(), id),
        };
        let mut node = ContextNode::new(name, Some(parent), readonly);
        node.default_label = label.is_none();

        let ctx = self.push(node);
        self.node_mut(parent).children.insert(id, ctx);
        ctx
    }

    /// Finds the node for `name`, creating missing nodes along the path.
    pub(crate) fn resolve(&mut self, name: &ResourceName) -> CoreResult<ContextId> {
        let Some(((label, id), rest)) = name.segments().split_first() else {
            return Err(CoreError::invalid_lock("resource name has no segments"));
        };
        let mut ctx = self.root(label, *id);
        for (label, id) in rest {
            ctx = self.child(ctx, Some(label), *id);
        }
        Ok(ctx)
    }

    /// Builds the current name of `ctx` from the labels along its path.
    fn name_of(&self, ctx: ContextId) -> ResourceName {
        let mut segments = Vec::new();
        let mut current = Some(ctx);
        while let Some(id) = current {
            let node = self.node(id);
            if let Some(last) = node.name.segments().last() {
                segments.push(last.clone());
            }
            current = node.parent;
        }
        segments.reverse();
        ResourceName::from_segments(segments)
    }

    fn adjust_child_locks(&mut self, ctx: ContextId, txn: TransactionId, delta: isize) {
        let counts = &mut self.node_mut(ctx).num_child_locks;
        let current = counts.get(&txn).copied().unwrap_or(0);
        let updated = current.saturating_add_signed(delta);
        if updated == 0 {
            counts.remove(&txn);
        } else {
            counts.insert(txn, updated);
        }
    }

    pub(crate) fn forget_transaction(&mut self, txn: TransactionId) {
        for node in &mut self.nodes {
            node.num_child_locks.remove(&txn);
        }
    }
}

/// A node of the resource hierarchy (database, table, page) that enforces
/// multigranularity rules on top of the [`LockManager`].
///
/// Every mutating call validates completely before it touches the lock
/// manager, then keeps the parent's descendant-lock counter in step.
#[derive(Clone)]
pub struct LockContext {
    manager: Arc<LockManager>,
    id: ContextId,
    /// Lock key. Its labels may go stale; locks match on ids only.
    name: ResourceName,
}

impl LockContext {
    pub(crate) fn new(manager: Arc<LockManager>, id: ContextId) -> Self {
        let name = manager.arena().node(id).name.clone();
        Self { manager, id, name }
    }

    /// Returns the context for `name`, creating intermediate contexts on
    /// demand. Calling it twice yields the same node.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLock`] if `name` has no segments.
    pub fn from_resource_name(manager: &Arc<LockManager>, name: &ResourceName) -> CoreResult<Self> {
        let id = manager.arena().resolve(name)?;
        Ok(Self::new(Arc::clone(manager), id))
    }

    /// Returns the resource this context guards, with the labels currently
    /// recorded in the tree.
    #[must_use]
    pub fn name(&self) -> ResourceName {
        self.manager.arena().name_of(self.id)
    }

    /// Returns the arena id of this context.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the lock manager behind this context.
    #[must_use]
    pub fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    /// Acquires `lock_type` on this context.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedOperation`] if the context is readonly
    /// - [`CoreError::InvalidLock`] if the parent's lock cannot parent
    ///   `lock_type`, or an ancestor holds `SIX` and `lock_type` is `S`/`IS`
    /// - any error of [`LockManager::acquire`]
    pub fn acquire(&self, txn: &Arc<TransactionContext>, lock_type: LockType) -> CoreResult<()> {
        self.check_writable("acquire")?;
        let id = txn.id();
        self.check_parent_allows(id, lock_type)?;
        if matches!(lock_type, LockType::Shared | LockType::IntentShared) && self.has_six_ancestor(id) {
            return Err(CoreError::invalid_lock(format!(
                "{lock_type} on {} is redundant under a SIX ancestor",
                self.name()
            )));
        }

        self.manager.acquire(txn, &self.name, lock_type)?;
        self.adjust_parent_count(id, 1);
        Ok(())
    }

    /// Releases the lock held on this context.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedOperation`] if the context is readonly
    /// - [`CoreError::InvalidLock`] if the transaction still holds locks on
    ///   descendants
    /// - [`CoreError::NoLockHeld`] if nothing is held here
    pub fn release(&self, txn: &Arc<TransactionContext>) -> CoreResult<()> {
        self.check_writable("release")?;
        let id = txn.id();
        if let Some(lock) = self.descendant_locks(id).first() {
            return Err(CoreError::invalid_lock(format!(
                "cannot release {} while {lock} is held",
                self.name()
            )));
        }

        self.manager.release(txn, &self.name)?;
        self.adjust_parent_count(id, -1);
        Ok(())
    }

    /// Promotes the lock on this context to `new_type`.
    ///
    /// Promoting `IS`, `IX` or `S` to `SIX` also releases, in the same step,
    /// every `S` and `IS` lock the transaction holds below this context.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedOperation`] if the context is readonly
    /// - [`CoreError::InvalidLock`] for `SIX` under a `SIX` ancestor, or a
    ///   mode the parent cannot parent or that cannot parent a held child
    /// - any error of [`LockManager::promote`]
    pub fn promote(&self, txn: &Arc<TransactionContext>, new_type: LockType) -> CoreResult<()> {
        self.check_writable("promote")?;
        let id = txn.id();
        let held = self.held(id);

        if new_type == LockType::SharedIntentExclusive && self.has_six_ancestor(id) {
            return Err(CoreError::invalid_lock(format!(
                "cannot promote {} to SIX under a SIX ancestor",
                self.name()
            )));
        }
        self.check_parent_allows(id, new_type)?;

        let to_six = new_type == LockType::SharedIntentExclusive
            && matches!(
                held,
                LockType::IntentShared | LockType::IntentExclusive | LockType::Shared
            );
        if !to_six {
            if let Some(child) = self
                .child_locks(id)
                .into_iter()
                .find(|l| !LockType::can_be_parent(new_type, l.lock_type))
            {
                return Err(CoreError::invalid_lock(format!(
                    "{new_type} on {} cannot parent {child}",
                    self.name()
                )));
            }
            return self.manager.promote(txn, &self.name, new_type);
        }

        let released: Vec<Lock> = self
            .descendant_locks(id)
            .into_iter()
            .filter(|l| matches!(l.lock_type, LockType::Shared | LockType::IntentShared))
            .collect();
        let mut names: Vec<ResourceName> = released.iter().map(|l| l.name.clone()).collect();
        names.push(self.name.clone());

        self.manager
            .acquire_and_release(txn, &self.name, new_type, &names)?;
        self.forget_descendant_locks(id, &released);
        Ok(())
    }

    /// Replaces every lock the transaction holds below this context with a
    /// single lock here: `S` if this lock and all replaced locks are `S` or
    /// `IS`, else `X`.
    ///
    /// Makes at most one mutating call to the lock manager and is a no-op if
    /// the held mode already is the escalated mode.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedOperation`] if the context is readonly
    /// - [`CoreError::NoLockHeld`] if nothing is held at this level
    pub fn escalate(&self, txn: &Arc<TransactionContext>) -> CoreResult<()> {
        self.check_writable("escalate")?;
        let id = txn.id();
        let held = self.held(id);
        if held == LockType::NoLock {
            return Err(CoreError::NoLockHeld {
                txn: id,
                name: self.name.clone(),
            });
        }

        let descendants = self.descendant_locks(id);
        let shared_only = std::iter::once(held)
            .chain(descendants.iter().map(|l| l.lock_type))
            .all(|t| matches!(t, LockType::Shared | LockType::IntentShared));
        let target = if shared_only {
            LockType::Shared
        } else {
            LockType::Exclusive
        };
        if target == held {
            return Ok(());
        }

        let mut names: Vec<ResourceName> = descendants.iter().map(|l| l.name.clone()).collect();
        names.push(self.name.clone());
        self.manager
            .acquire_and_release(txn, &self.name, target, &names)?;
        self.forget_descendant_locks(id, &descendants);
        Ok(())
    }

    /// Returns the mode recorded on this context, or `NL`.
    #[must_use]
    pub fn explicit_lock_type(&self, txn: Option<&TransactionContext>) -> LockType {
        txn.map_or(LockType::NoLock, |t| self.held(t.id()))
    }

    /// Returns the access the transaction has here, counting `S` and `X`
    /// inherited from ancestors.
    #[must_use]
    pub fn effective_lock_type(&self, txn: Option<&TransactionContext>) -> LockType {
        let Some(txn) = txn else {
            return LockType::NoLock;
        };
        let mut name = Some(self.name.clone());
        while let Some(current) = name {
            match self.manager.lock_type(txn.id(), &current) {
                LockType::Exclusive => return LockType::Exclusive,
                LockType::Shared | LockType::SharedIntentExclusive => return LockType::Shared,
                _ => name = current.parent(),
            }
        }
        LockType::NoLock
    }

    /// Fraction of this context's children the transaction has locked.
    #[must_use]
    pub fn saturation(&self, txn: Option<&TransactionContext>) -> f64 {
        let Some(txn) = txn else {
            return 0.0;
        };
        let capacity = self.capacity();
        if capacity == 0 {
            return 0.0;
        }
        self.num_child_locks(txn.id()) as f64 / capacity as f64
    }

    /// Number of locks the transaction holds on strict descendants.
    #[must_use]
    pub fn num_child_locks(&self, txn: TransactionId) -> usize {
        self.manager
            .arena()
            .node(self.id)
            .num_child_locks
            .get(&txn)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the parent context.
    #[must_use]
    pub fn parent_context(&self) -> Option<LockContext> {
        let parent = self.manager.arena().node(self.id).parent;
        parent.map(|p| LockContext::new(Arc::clone(&self.manager), p))
    }

    /// Returns the child with the given id, creating it with `label` if needed.
    pub fn child_context(&self, label: &str, id: u64) -> LockContext {
        let child = self.manager.arena().child(self.id, Some(label), id);
        LockContext::new(Arc::clone(&self.manager), child)
    }

    /// Returns the child with the given id, labelled by the id if created.
    pub fn child(&self, id: u64) -> LockContext {
        let child = self.manager.arena().child(self.id, None, id);
        LockContext::new(Arc::clone(&self.manager), child)
    }

    /// Makes every context created below this one readonly.
    pub fn disable_child_locks(&self) {
        self.manager.arena().node_mut(self.id).child_locks_disabled = true;
    }

    /// Returns true if mutating calls on this context are rejected.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.manager.arena().node(self.id).readonly
    }

    /// Overrides the number of children used for saturation.
    pub fn set_capacity(&self, capacity: usize) {
        self.manager.arena().node_mut(self.id).capacity = Some(capacity);
    }

    /// Returns the capacity override, or the number of materialized children.
    #[must_use]
    pub fn capacity(&self) -> usize {
        let arena = self.manager.arena();
        let node = arena.node(self.id);
        node.capacity.unwrap_or(node.children.len())
    }

    /// Returns true for direct children of a root context.
    #[must_use]
    pub fn is_table_context(&self) -> bool {
        let arena = self.manager.arena();
        arena
            .node(self.id)
            .parent
            .is_some_and(|p| arena.node(p).parent.is_none())
    }

    /// Lets the policy layer escalate this context when it saturates.
    pub fn enable_auto_escalate(&self) {
        self.manager.arena().node_mut(self.id).auto_escalate = true;
    }

    /// Stops automatic escalation of this context.
    pub fn disable_auto_escalate(&self) {
        self.manager.arena().node_mut(self.id).auto_escalate = false;
    }

    /// Returns true if automatic escalation is enabled.
    #[must_use]
    pub fn is_auto_escalate_enabled(&self) -> bool {
        self.manager.arena().node(self.id).auto_escalate
    }

    fn held(&self, txn: TransactionId) -> LockType {
        self.manager.lock_type(txn, &self.name)
    }

    fn check_writable(&self, op: &str) -> CoreResult<()> {
        if self.is_readonly() {
            return Err(CoreError::unsupported(format!(
                "cannot {op} on readonly context {}",
                self.name()
            )));
        }
        Ok(())
    }

    fn check_parent_allows(&self, txn: TransactionId, lock_type: LockType) -> CoreResult<()> {
        let Some(parent) = self.name.parent() else {
            return Ok(());
        };
        let parent_type = self.manager.lock_type(txn, &parent);
        if LockType::can_be_parent(parent_type, lock_type) {
            Ok(())
        } else {
            Err(CoreError::invalid_lock(format!(
                "{parent_type} on {parent} cannot parent {lock_type} on {}",
                self.name()
            )))
        }
    }

    fn has_six_ancestor(&self, txn: TransactionId) -> bool {
        let mut name = self.name.parent();
        while let Some(current) = name {
            if self.manager.lock_type(txn, &current) == LockType::SharedIntentExclusive {
                return true;
            }
            name = current.parent();
        }
        false
    }

    fn descendant_locks(&self, txn: TransactionId) -> Vec<Lock> {
        self.manager
            .locks_for(txn)
            .into_iter()
            .filter(|l| l.name.is_descendant_of(&self.name))
            .collect()
    }

    fn child_locks(&self, txn: TransactionId) -> Vec<Lock> {
        self.manager
            .locks_for(txn)
            .into_iter()
            .filter(|l| l.name.is_child_of(&self.name))
            .collect()
    }

    fn adjust_parent_count(&self, txn: TransactionId, delta: isize) {
        let mut arena = self.manager.arena();
        if let Some(parent) = arena.node(self.id).parent {
            arena.adjust_child_locks(parent, txn, delta);
        }
    }

    /// Decrements the parent counter of every released descendant lock.
    fn forget_descendant_locks(&self, txn: TransactionId, released: &[Lock]) {
        let mut arena = self.manager.arena();
        for lock in released {
            let Ok(ctx) = arena.resolve(&lock.name) else {
                continue;
            };
            if let Some(parent) = arena.node(ctx).parent {
                arena.adjust_child_locks(parent, txn, -1);
            }
        }
    }
}

impl fmt::Debug for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("name", &self.name().to_string())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockContext({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::LockType::{
        Exclusive as X, IntentExclusive as IX, IntentShared as IS, NoLock as NL, Shared as S,
        SharedIntentExclusive as SIX,
    };

    struct Tree {
        manager: Arc<LockManager>,
        db: LockContext,
        t1: LockContext,
        t2: LockContext,
    }

    fn tree() -> Tree {
        let manager = Arc::new(LockManager::new());
        let db = manager.database_context();
        let t1 = db.child_context("table1", 1);
        let t2 = db.child_context("table2", 2);
        Tree { manager, db, t1, t2 }
    }

    fn txn(id: u64) -> Arc<TransactionContext> {
        Arc::new(TransactionContext::new(TransactionId::new(id)))
    }

    fn held(manager: &LockManager, txn: &TransactionContext) -> Vec<(String, LockType)> {
        manager
            .locks_for(txn.id())
            .into_iter()
            .map(|l| (l.name.to_string(), l.lock_type))
            .collect()
    }

    #[test]
    fn acquire_requires_parent_intent() {
        let tree = tree();
        let t = txn(1);

        assert!(matches!(
            tree.t1.acquire(&t, S),
            Err(CoreError::InvalidLock { .. })
        ));
        tree.db.acquire(&t, IS).unwrap();
        tree.t1.acquire(&t, S).unwrap();
        assert!(matches!(
            tree.t2.acquire(&t, X),
            Err(CoreError::InvalidLock { .. })
        ));
        assert_eq!(tree.db.num_child_locks(t.id()), 1);
    }

    #[test]
    fn shared_under_six_is_redundant() {
        let tree = tree();
        let t = txn(1);
        tree.db.acquire(&t, SIX).unwrap();
        assert!(matches!(
            tree.t1.acquire(&t, IS),
            Err(CoreError::InvalidLock { .. })
        ));
        tree.t1.acquire(&t, X).unwrap();
    }

    #[test]
    fn release_checks_descendants() {
        let tree = tree();
        let t = txn(1);
        tree.db.acquire(&t, IX).unwrap();
        tree.t1.acquire(&t, X).unwrap();

        assert!(matches!(
            tree.db.release(&t),
            Err(CoreError::InvalidLock { .. })
        ));
        tree.t1.release(&t).unwrap();
        assert_eq!(tree.db.num_child_locks(t.id()), 0);
        tree.db.release(&t).unwrap();
        assert!(tree.manager.locks_for(t.id()).is_empty());
    }

    #[test]
    fn readonly_contexts_reject_mutation() {
        let tree = tree();
        let t = txn(1);
        tree.t1.disable_child_locks();
        let page = tree.t1.child(5);

        assert!(page.is_readonly());
        assert!(!tree.t1.is_readonly());
        assert!(matches!(
            page.acquire(&t, S),
            Err(CoreError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            page.escalate(&t),
            Err(CoreError::UnsupportedOperation { .. })
        ));
        assert!(page.child(1).is_readonly());
    }

    #[test]
    fn promote_rules() {
        let tree = tree();
        let t = txn(1);
        tree.db.acquire(&t, IS).unwrap();
        tree.t1.acquire(&t, S).unwrap();

        // parent IS cannot parent X
        assert!(matches!(
            tree.t1.promote(&t, X),
            Err(CoreError::InvalidLock { .. })
        ));
        tree.db.promote(&t, IX).unwrap();
        tree.t1.promote(&t, X).unwrap();
        assert_eq!(tree.t1.explicit_lock_type(Some(&*t)), X);
        assert_eq!(tree.db.num_child_locks(t.id()), 1);
    }

    #[test]
    fn promote_to_six_drops_shared_descendants() {
        let tree = tree();
        let t = txn(1);
        let p3 = tree.t1.child(3);
        let p5 = tree.t1.child(5);
        tree.db.acquire(&t, IX).unwrap();
        tree.t1.acquire(&t, IX).unwrap();
        p3.acquire(&t, S).unwrap();
        p5.acquire(&t, X).unwrap();
        assert_eq!(tree.t1.num_child_locks(t.id()), 2);

        tree.t1.promote(&t, SIX).unwrap();
        assert_eq!(
            held(&tree.manager, &t),
            vec![
                ("database".to_string(), IX),
                ("database/table1".to_string(), SIX),
                ("database/table1/5".to_string(), X),
            ]
        );
        assert_eq!(tree.t1.num_child_locks(t.id()), 1);
        assert_eq!(tree.db.num_child_locks(t.id()), 1);

        assert!(matches!(
            p5.promote(&t, SIX),
            Err(CoreError::InvalidLock { .. })
        ));
    }

    #[test]
    fn escalate_collapses_descendants_in_one_step() {
        let tree = tree();
        let t = txn(1);
        let p3 = tree.t1.child(3);
        let p5 = tree.t1.child(5);
        tree.db.acquire(&t, IX).unwrap();
        tree.t1.acquire(&t, IX).unwrap();
        tree.t2.acquire(&t, S).unwrap();
        p3.acquire(&t, S).unwrap();
        p5.acquire(&t, X).unwrap();

        tree.t1.escalate(&t).unwrap();
        let after = held(&tree.manager, &t);
        assert_eq!(
            after,
            vec![
                ("database".to_string(), IX),
                ("database/table1".to_string(), X),
                ("database/table2".to_string(), S),
            ]
        );
        assert_eq!(tree.t1.num_child_locks(t.id()), 0);
        assert_eq!(tree.db.num_child_locks(t.id()), 2);

        tree.t1.escalate(&t).unwrap();
        assert_eq!(held(&tree.manager, &t), after);
        assert_eq!(tree.db.num_child_locks(t.id()), 2);
    }

    #[test]
    fn escalate_shared_subtree_to_s() {
        let tree = tree();
        let t = txn(1);
        tree.db.acquire(&t, IS).unwrap();
        tree.t1.acquire(&t, IS).unwrap();
        tree.t1.child(1).acquire(&t, S).unwrap();
        tree.t1.child(2).acquire(&t, S).unwrap();

        tree.t1.escalate(&t).unwrap();
        assert_eq!(tree.t1.explicit_lock_type(Some(&*t)), S);
        assert_eq!(tree.manager.locks_for(t.id()).len(), 2);
    }

    #[test]
    fn escalate_without_lock_fails() {
        let tree = tree();
        let t = txn(1);
        assert!(matches!(
            tree.t1.escalate(&t),
            Err(CoreError::NoLockHeld { .. })
        ));
    }

    #[test]
    fn effective_lock_type_inherits_from_ancestors() {
        let tree = tree();
        let t = txn(1);
        let page = tree.t1.child(9);

        assert_eq!(page.effective_lock_type(None), NL);
        tree.db.acquire(&t, SIX).unwrap();
        assert_eq!(page.effective_lock_type(Some(&*t)), S);
        tree.t1.acquire(&t, X).unwrap();
        assert_eq!(page.effective_lock_type(Some(&*t)), X);
        assert_eq!(page.explicit_lock_type(Some(&*t)), NL);
        assert_eq!(tree.t2.effective_lock_type(Some(&*t)), S);
    }

    #[test]
    fn saturation_and_capacity() {
        let tree = tree();
        let t = txn(1);
        assert_eq!(tree.db.capacity(), 2);
        tree.t1.set_capacity(10);

        tree.db.acquire(&t, IX).unwrap();
        tree.t1.acquire(&t, IX).unwrap();
        tree.t1.child(1).acquire(&t, X).unwrap();
        tree.t1.child(2).acquire(&t, X).unwrap();

        assert!((tree.t1.saturation(Some(&*t)) - 0.2).abs() < f64::EPSILON);
        assert_eq!(tree.t1.saturation(None), 0.0);
        assert_eq!(tree.t2.saturation(Some(&*t)), 0.0);
    }

    #[test]
    fn resolving_names_is_idempotent() {
        let tree = tree();
        let name = tree.t1.name().child("page", 42);

        let a = LockContext::from_resource_name(&tree.manager, &name).unwrap();
        let b = LockContext::from_resource_name(&tree.manager, &name).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), tree.t1.child(42).id());
        assert_eq!(a.parent_context().map(|p| p.id()), Some(tree.t1.id()));
    }

    #[test]
    fn labels_fill_in_later() {
        let tree = tree();
        let unnamed = tree.db.child(7);
        assert_eq!(unnamed.name().to_string(), "database/7");
        let named = tree.db.child_context("orders", 7);
        assert_eq!(named.id(), unnamed.id());
        assert_eq!(named.name().to_string(), "database/orders");
    }

    #[test]
    fn earlier_handles_see_later_labels() {
        let tree = tree();
        let table = tree.db.child(7);
        let row = table.child_context("row", 3);
        assert_eq!(row.name().to_string(), "database/7/row");

        tree.db.child_context("orders", 7);
        assert_eq!(table.name().to_string(), "database/orders");
        assert_eq!(row.name().to_string(), "database/orders/row");
        assert_eq!(row.to_string(), "LockContext(database/orders/row)");
    }

    #[test]
    fn empty_resource_names_are_rejected() {
        let tree = tree();
        let empty = ResourceName::from_segments(Vec::new());
        assert!(matches!(
            LockContext::from_resource_name(&tree.manager, &empty),
            Err(CoreError::InvalidLock { .. })
        ));
    }

    #[test]
    fn table_contexts() {
        let tree = tree();
        assert!(!tree.db.is_table_context());
        assert!(tree.t1.is_table_context());
        assert!(!tree.t1.child(1).is_table_context());

        assert!(!tree.t1.is_auto_escalate_enabled());
        tree.t1.enable_auto_escalate();
        assert!(tree.t1.is_auto_escalate_enabled());
        tree.t1.disable_auto_escalate();
        assert!(!tree.t1.is_auto_escalate_enabled());
    }
}
