//! Runs generated workloads against a [`TestEngine`] and a model of what
//! the pages should hold.

use crate::fixtures::{page, TestEngine};
use crate::generators::WorkloadOp;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tessera_core::transaction::TransactionContext;
use tessera_core::{CoreResult, PageNum};

const SAVEPOINT: &str = "workload";

struct ActiveTransaction {
    txn: Arc<TransactionContext>,
    writes: Vec<(PageNum, u16, Vec<u8>)>,
    savepoint: Option<usize>,
}

/// Expected page contents for a workload.
///
/// Pages are locked exclusively by their writer until it finishes, so the
/// committed image is the writes of committed transactions in commit order.
#[derive(Debug, Clone, Default)]
pub struct WorkloadModel {
    committed: BTreeMap<PageNum, Vec<u8>>,
    live: BTreeMap<PageNum, Vec<u8>>,
    /// Steps the runner skipped because of a free slot or a lock conflict.
    pub skipped: usize,
    /// Transactions committed.
    pub commits: usize,
    /// Transactions aborted.
    pub aborts: usize,
}

impl WorkloadModel {
    fn new(pages: u64, image_len: usize) -> Self {
        let blank: BTreeMap<PageNum, Vec<u8>> =
            (0..pages).map(|i| (page(i), vec![0; image_len])).collect();
        Self {
            committed: blank.clone(),
            live: blank,
            ..Self::default()
        }
    }

    /// Page contents visible before a crash.
    pub fn live(&self) -> &BTreeMap<PageNum, Vec<u8>> {
        &self.live
    }

    /// Page contents that must survive a crash and restart.
    pub fn committed(&self) -> &BTreeMap<PageNum, Vec<u8>> {
        &self.committed
    }

    fn rebuild_live(&mut self, active: &[Option<ActiveTransaction>]) {
        self.live = self.committed.clone();
        for entry in active.iter().flatten() {
            apply(&mut self.live, &entry.writes);
        }
    }
}

fn apply(image: &mut BTreeMap<PageNum, Vec<u8>>, writes: &[(PageNum, u16, Vec<u8>)]) {
    for (page, offset, data) in writes {
        if let Some(bytes) = image.get_mut(page) {
            let start = usize::from(*offset);
            bytes[start..start + data.len()].copy_from_slice(data);
        }
    }
}

/// Allocates `pages` pages of the data partition in a committed
/// transaction.
pub fn setup_pages(engine: &TestEngine, pages: u64) -> CoreResult<()> {
    let txn = engine.begin();
    for i in 0..pages {
        engine.alloc_page(&txn, page(i))?;
    }
    engine.commit(&txn)
}

/// Runs `ops` on `engine` over `pages` pre-allocated pages with up to
/// `slots` concurrent transactions.
///
/// Transactions left open at the end stay open, so a crash afterwards
/// turns them into losers. `image_len` is the number of leading page bytes
/// the model tracks.
pub fn run_workload(
    engine: &TestEngine,
    ops: &[WorkloadOp],
    pages: u64,
    slots: usize,
    image_len: usize,
) -> CoreResult<WorkloadModel> {
    let mut model = WorkloadModel::new(pages, image_len);
    let mut active: Vec<Option<ActiveTransaction>> = (0..slots).map(|_| None).collect();
    let mut owners: HashMap<PageNum, usize> = HashMap::new();

    for op in ops {
        match op {
            WorkloadOp::Begin => match active.iter().position(Option::is_none) {
                Some(slot) => {
                    active[slot] = Some(ActiveTransaction {
                        txn: engine.begin(),
                        writes: Vec::new(),
                        savepoint: None,
                    });
                }
                None => model.skipped += 1,
            },
            WorkloadOp::Write {
                slot,
                page: index,
                offset,
                data,
            } => {
                let target = page(*index);
                let blocked = owners.get(&target).is_some_and(|owner| owner != slot);
                let fits = usize::from(*offset) + data.len() <= image_len;
                match active.get_mut(*slot).and_then(Option::as_mut) {
                    Some(entry) if !blocked && fits => {
                        engine.write(&entry.txn, target, *offset, data)?;
                        entry.writes.push((target, *offset, data.clone()));
                        owners.insert(target, *slot);
                    }
                    _ => model.skipped += 1,
                }
            }
            WorkloadOp::Commit { slot } | WorkloadOp::Abort { slot } => {
                let Some(entry) = active.get_mut(*slot).and_then(Option::take) else {
                    model.skipped += 1;
                    continue;
                };
                if matches!(op, WorkloadOp::Commit { .. }) {
                    engine.commit(&entry.txn)?;
                    apply(&mut model.committed, &entry.writes);
                    model.commits += 1;
                } else {
                    engine.abort(&entry.txn)?;
                    model.aborts += 1;
                }
                owners.retain(|_, owner| owner != slot);
            }
            WorkloadOp::Savepoint { slot } => match active.get_mut(*slot).and_then(Option::as_mut) {
                Some(entry) => {
                    engine.recovery.savepoint(entry.txn.id(), SAVEPOINT)?;
                    entry.savepoint = Some(entry.writes.len());
                }
                None => model.skipped += 1,
            },
            WorkloadOp::RollbackToSavepoint { slot } => {
                match active.get_mut(*slot).and_then(Option::as_mut) {
                    Some(ActiveTransaction {
                        txn,
                        writes,
                        savepoint: Some(mark),
                    }) => {
                        engine.recovery.rollback_to_savepoint(txn.id(), SAVEPOINT)?;
                        writes.truncate(*mark);
                    }
                    _ => model.skipped += 1,
                }
            }
            WorkloadOp::Checkpoint => {
                engine.recovery.checkpoint()?;
            }
            WorkloadOp::FlushPage { page: index } => {
                engine.recovery.buffer().flush_page(page(*index))?;
            }
        }
    }

    model.rebuild_live(&active);
    Ok(model)
}

/// Reads the first `len` bytes of every page in `pages`.
pub fn snapshot(engine: &TestEngine, pages: u64, len: usize) -> CoreResult<BTreeMap<PageNum, Vec<u8>>> {
    (0..pages)
        .map(|i| Ok((page(i), engine.read(page(i), 0, len)?)))
        .collect()
}
