//! Wiring shared by the recovery tests.

use super::RecoveryManager;
use crate::buffer::{BufferManager, DiskSpaceManager, MemoryBufferManager, MemoryDiskManager};
use crate::concurrency::LockManager;
use crate::config::Config;
use crate::log::LogManager;
use crate::transaction::{TransactionContext, TransactionFactory, TransactionManager};
use crate::types::{Lsn, PageNum, PartitionId, TransactionId};
use std::sync::Arc;
use tessera_storage::InMemoryBackend;

pub(crate) const PAGE_SIZE: usize = 64;

pub(crate) struct Harness {
    pub(crate) locks: Arc<LockManager>,
    pub(crate) txns: Arc<TransactionManager>,
    pub(crate) disk: Arc<MemoryDiskManager>,
    pub(crate) rm: Arc<RecoveryManager>,
    pub(crate) config: Config,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(Config::default().page_size(PAGE_SIZE))
    }

    pub(crate) fn with_config(config: Config) -> Self {
        let disk = Arc::new(MemoryDiskManager::new(config.page_size));
        let harness = Self::assemble(InMemoryBackend::new(), disk, config);
        harness.rm.initialize().unwrap();
        harness
    }

    fn assemble(backend: InMemoryBackend, disk: Arc<MemoryDiskManager>, config: Config) -> Self {
        let locks = Arc::new(LockManager::new());
        let txns = Arc::new(TransactionManager::new(Arc::clone(&locks)));
        let log = Arc::new(LogManager::open(Box::new(backend), &config).unwrap());
        let buffer = Arc::new(MemoryBufferManager::new(
            Arc::clone(&disk) as Arc<dyn DiskSpaceManager>
        ));
        let rm = RecoveryManager::new(
            locks.database_context(),
            log,
            Arc::clone(&disk) as Arc<dyn DiskSpaceManager>,
            buffer as Arc<dyn BufferManager>,
            Arc::clone(&txns) as Arc<dyn TransactionFactory>,
            config.clone(),
        );
        Self {
            locks,
            txns,
            disk,
            rm,
            config,
        }
    }

    /// Drops the cache and every unflushed log record, keeping the disk.
    pub(crate) fn crash(&self) -> Self {
        let durable = self.rm.log().durable_contents().unwrap();
        Self::assemble(
            InMemoryBackend::with_data(durable),
            Arc::clone(&self.disk),
            self.config.clone(),
        )
    }

    pub(crate) fn flush_log(&self) {
        let log = self.rm.log();
        log.flush_to_lsn(log.next_lsn()).unwrap();
    }

    pub(crate) fn begin(&self) -> Arc<TransactionContext> {
        let txn = self.txns.begin();
        self.rm.start_transaction(&txn);
        txn
    }

    pub(crate) fn alloc_page(&self, txn: TransactionId, page: PageNum) {
        if !self.disk.is_part_allocated(page.partition()) {
            self.rm.log_alloc_part(txn, page.partition()).unwrap();
            self.disk.alloc_part(page.partition()).unwrap();
        }
        self.rm.log_alloc_page(txn, page).unwrap();
        self.disk.alloc_page(page).unwrap();
    }

    /// Logs and applies a write the way the engine does.
    pub(crate) fn write(&self, txn: TransactionId, page: PageNum, offset: u16, data: &[u8]) -> Lsn {
        let handle = self.rm.buffer().fetch_page(page).unwrap();
        let before = handle.read(usize::from(offset), data.len()).unwrap();
        let lsn = self
            .rm
            .log_page_write(txn, page, offset, &before, data)
            .unwrap();
        handle.write(usize::from(offset), data).unwrap();
        handle.set_page_lsn(lsn);
        lsn
    }

    pub(crate) fn read(&self, page: PageNum, offset: usize, len: usize) -> Vec<u8> {
        self.rm
            .buffer()
            .fetch_page(page)
            .unwrap()
            .read(offset, len)
            .unwrap()
    }

    /// Commits and ends a transaction that allocates `pages`.
    pub(crate) fn setup_pages(&self, pages: &[PageNum]) {
        let txn = self.begin();
        for page in pages {
            self.alloc_page(txn.id(), *page);
        }
        self.rm.commit(txn.id()).unwrap();
        self.rm.end(txn.id()).unwrap();
    }
}

pub(crate) fn page(index: u64) -> PageNum {
    PageNum::new(PartitionId::new(1), index)
}
