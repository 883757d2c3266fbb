//! Property-based test generators using proptest.
//!
//! Provides strategies for lock types, page writes and whole transaction
//! workloads.

use proptest::prelude::*;
use tessera_core::concurrency::LockType;

/// Strategy for any lock type.
pub fn lock_type_strategy() -> impl Strategy<Value = LockType> {
    prop::sample::select(LockType::ALL.to_vec())
}

/// Strategy for the lock types a caller may request from the policy layer.
pub fn requested_lock_strategy() -> impl Strategy<Value = LockType> {
    prop::sample::select(vec![LockType::NoLock, LockType::Shared, LockType::Exclusive])
}

/// Strategy for `(offset, bytes)` of a page write inside the first
/// `span` bytes of a page.
pub fn page_write_strategy(span: u16) -> impl Strategy<Value = (u16, Vec<u8>)> {
    (0..span.saturating_sub(1).max(1)).prop_flat_map(move |offset| {
        let room = usize::from(span - offset).max(1);
        (
            Just(offset),
            prop::collection::vec(any::<u8>(), 1..=room.min(24)),
        )
    })
}

/// One step of a generated workload.
///
/// Transactions are addressed by slot; `Begin` fills the lowest free slot.
/// Steps naming a free slot are skipped by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadOp {
    /// Start a transaction in the lowest free slot.
    Begin,
    /// Write `data` at `offset` of page `page`.
    Write {
        /// Transaction slot.
        slot: usize,
        /// Page index in the data partition.
        page: u64,
        /// Byte offset in the page.
        offset: u16,
        /// New bytes.
        data: Vec<u8>,
    },
    /// Commit and end a transaction.
    Commit {
        /// Transaction slot.
        slot: usize,
    },
    /// Abort and roll back a transaction.
    Abort {
        /// Transaction slot.
        slot: usize,
    },
    /// Set a savepoint.
    Savepoint {
        /// Transaction slot.
        slot: usize,
    },
    /// Roll back to the last savepoint.
    RollbackToSavepoint {
        /// Transaction slot.
        slot: usize,
    },
    /// Take a checkpoint.
    Checkpoint,
    /// Write one cached page to disk.
    FlushPage {
        /// Page index in the data partition.
        page: u64,
    },
}

/// Strategy for one workload step over `pages` pages and `slots` slots.
pub fn workload_op_strategy(pages: u64, slots: usize) -> impl Strategy<Value = WorkloadOp> {
    let slot = 0..slots.max(1);
    prop_oneof![
        2 => Just(WorkloadOp::Begin),
        6 => (slot.clone(), 0..pages.max(1), page_write_strategy(64)).prop_map(
            |(slot, page, (offset, data))| WorkloadOp::Write {
                slot,
                page,
                offset,
                data,
            }
        ),
        2 => slot.clone().prop_map(|slot| WorkloadOp::Commit { slot }),
        1 => slot.clone().prop_map(|slot| WorkloadOp::Abort { slot }),
        1 => slot.clone().prop_map(|slot| WorkloadOp::Savepoint { slot }),
        1 => slot.prop_map(|slot| WorkloadOp::RollbackToSavepoint { slot }),
        1 => Just(WorkloadOp::Checkpoint),
        1 => (0..pages.max(1)).prop_map(|page| WorkloadOp::FlushPage { page }),
    ]
}

/// Strategy for a workload of up to `max_ops` steps.
pub fn workload_strategy(
    pages: u64,
    slots: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(pages, slots), 1..max_ops.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn page_writes_stay_in_span((offset, data) in page_write_strategy(64)) {
            prop_assert!(!data.is_empty());
            prop_assert!(usize::from(offset) + data.len() <= 64);
        }

        #[test]
        fn workload_ops_use_valid_slots(ops in workload_strategy(4, 3, 20)) {
            for op in ops {
                match op {
                    WorkloadOp::Write { slot, page, .. } => {
                        prop_assert!(slot < 3);
                        prop_assert!(page < 4);
                    }
                    WorkloadOp::Commit { slot }
                    | WorkloadOp::Abort { slot }
                    | WorkloadOp::Savepoint { slot }
                    | WorkloadOp::RollbackToSavepoint { slot } => prop_assert!(slot < 3),
                    WorkloadOp::FlushPage { page } => prop_assert!(page < 4),
                    WorkloadOp::Begin | WorkloadOp::Checkpoint => {}
                }
            }
        }
    }
}
