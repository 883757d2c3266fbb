//! Lock acquisition policy.
//!
//! [`ensure_sufficient_lock_held`] is the single entry point callers use to
//! get read or write access to a resource. It issues the least permissive
//! set of lock operations on the context and its ancestors that grants the
//! requested access.

use super::context::LockContext;
use super::lock_type::LockType;
use crate::error::CoreResult;
use crate::transaction::TransactionContext;
use std::sync::Arc;
use tracing::debug;

/// Saturation of a table context at which it is escalated automatically.
pub const AUTO_ESCALATE_SATURATION: f64 = 0.2;

/// Smallest capacity a table context needs before auto-escalation applies.
pub const AUTO_ESCALATE_MIN_CAPACITY: usize = 10;

/// Makes sure `txn` can access `ctx` with at least `request` (`NL`, `S` or
/// `X`), acquiring intent locks on ancestors as needed.
///
/// Does nothing without a transaction, for `NL`, or on a readonly context.
///
/// # Errors
///
/// Propagates errors from the lock context operations it issues. With a
/// well-formed lock tree these only occur if the caller broke the
/// multigranularity protocol through direct context calls.
pub fn ensure_sufficient_lock_held(
    ctx: &LockContext,
    txn: Option<&Arc<TransactionContext>>,
    request: LockType,
) -> CoreResult<()> {
    let Some(txn) = txn else {
        return Ok(());
    };
    if request == LockType::NoLock || ctx.is_readonly() {
        return Ok(());
    }

    auto_escalate(ctx, txn)?;

    let effective = ctx.effective_lock_type(Some(txn));
    let explicit = ctx.explicit_lock_type(Some(txn));

    if request == LockType::Shared {
        if matches!(effective, LockType::Shared | LockType::Exclusive) {
            return Ok(());
        }
        match explicit {
            LockType::Shared | LockType::Exclusive | LockType::SharedIntentExclusive => {}
            LockType::IntentShared => ctx.escalate(txn)?,
            LockType::IntentExclusive => ctx.promote(txn, LockType::SharedIntentExclusive)?,
            LockType::NoLock => {
                ensure_ancestors(ctx, txn, LockType::IntentShared)?;
                ctx.acquire(txn, LockType::Shared)?;
            }
        }
        return Ok(());
    }

    if effective == LockType::Exclusive {
        return Ok(());
    }
    ensure_ancestors(ctx, txn, LockType::IntentExclusive)?;
    match explicit {
        LockType::Exclusive => {}
        LockType::Shared => ctx.promote(txn, LockType::Exclusive)?,
        LockType::IntentShared => {
            ctx.escalate(txn)?;
            if ctx.explicit_lock_type(Some(txn)) != LockType::Exclusive {
                ctx.promote(txn, LockType::Exclusive)?;
            }
        }
        LockType::IntentExclusive | LockType::SharedIntentExclusive => ctx.escalate(txn)?,
        LockType::NoLock => ctx.acquire(txn, LockType::Exclusive)?,
    }
    Ok(())
}

/// Makes sure every ancestor of `ctx` holds `IX`, without touching `ctx`.
///
/// Used before page writes whose exclusive lock is taken elsewhere.
///
/// # Errors
///
/// Propagates errors from the lock context operations it issues.
pub fn ensure_write_intent(ctx: &LockContext, txn: Option<&Arc<TransactionContext>>) -> CoreResult<()> {
    let Some(txn) = txn else {
        return Ok(());
    };
    if ctx.is_readonly() {
        return Ok(());
    }
    ensure_ancestors(ctx, txn, LockType::IntentExclusive)
}

/// Gives every strict ancestor of `ctx` at least `intent`, root first.
fn ensure_ancestors(
    ctx: &LockContext,
    txn: &Arc<TransactionContext>,
    intent: LockType,
) -> CoreResult<()> {
    let mut chain = Vec::new();
    let mut parent = ctx.parent_context();
    while let Some(p) = parent {
        parent = p.parent_context();
        chain.push(p);
    }

    for ancestor in chain.iter().rev() {
        let held = ancestor.explicit_lock_type(Some(txn));
        if LockType::substitutable(held, intent) {
            continue;
        }
        match (held, intent) {
            (LockType::NoLock, _) => ancestor.acquire(txn, intent)?,
            (LockType::Shared, LockType::IntentExclusive) => {
                ancestor.promote(txn, LockType::SharedIntentExclusive)?;
            }
            _ => ancestor.promote(txn, intent)?,
        }
    }
    Ok(())
}

/// Escalates the nearest table above `ctx` once it is saturated enough.
fn auto_escalate(ctx: &LockContext, txn: &Arc<TransactionContext>) -> CoreResult<()> {
    let mut current = ctx.parent_context();
    while let Some(c) = current {
        if c.is_table_context() {
            let saturated = c.saturation(Some(txn)) >= AUTO_ESCALATE_SATURATION
                && c.capacity() >= AUTO_ESCALATE_MIN_CAPACITY;
            if c.is_auto_escalate_enabled()
                && saturated
                && !c.is_readonly()
                && c.explicit_lock_type(Some(txn)) != LockType::NoLock
            {
                debug!(txn = %txn.id(), table = %c.name(), "auto-escalating table lock");
                c.escalate(txn)?;
            }
            return Ok(());
        }
        current = c.parent_context();
    }
    Ok(())
}
