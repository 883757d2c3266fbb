//! Test fixtures and engine helpers.
//!
//! [`TestEngine`] wires every collaborator of the recovery manager the way
//! a storage engine would, takes page locks through the lock policy, and
//! can simulate a crash by dropping the page cache and the unflushed tail
//! of the log while keeping the disk.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::buffer::{BufferManager, DiskSpaceManager, MemoryBufferManager, MemoryDiskManager};
use tessera_core::concurrency::{ensure_sufficient_lock_held, LockContext, LockManager, LockType};
use tessera_core::log::LogManager;
use tessera_core::recovery::RecoveryManager;
use tessera_core::transaction::{TransactionContext, TransactionFactory, TransactionManager};
use tessera_core::{Config, CoreResult, Lsn, PageNum, PartitionId};
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Partition used by [`page`].
pub const DATA_PARTITION: PartitionId = PartitionId::new(1);

/// Page `index` of [`DATA_PARTITION`].
#[must_use]
pub fn page(index: u64) -> PageNum {
    PageNum::new(DATA_PARTITION, index)
}

/// An engine assembled for tests.
pub struct TestEngine {
    /// Lock manager shared by every transaction.
    pub locks: Arc<LockManager>,
    /// Transaction id source.
    pub transactions: Arc<TransactionManager>,
    /// Disk, which survives crashes.
    pub disk: Arc<MemoryDiskManager>,
    /// Recovery manager.
    pub recovery: Arc<RecoveryManager>,
    config: Config,
    log_path: Option<PathBuf>,
    /// Kept alive across crashes so the log file is not removed.
    _temp_dir: Option<Arc<TempDir>>,
}

impl TestEngine {
    /// Creates an engine with an in-memory log and small pages.
    pub fn memory() -> Self {
        Self::memory_with(Config::default().page_size(256))
    }

    /// Creates an engine with an in-memory log.
    pub fn memory_with(config: Config) -> Self {
        let disk = Arc::new(MemoryDiskManager::new(config.page_size));
        let engine = Self::from_parts(Box::new(InMemoryBackend::new()), disk, config)
            .expect("Failed to assemble engine");
        engine
            .recovery
            .initialize()
            .expect("Failed to initialize engine");
        engine
    }

    /// Creates an engine whose log lives in a temporary file.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join("tessera.log");
        let backend = FileBackend::open(&log_path).expect("Failed to create log file");
        let config = Config::default().page_size(256);
        let disk = Arc::new(MemoryDiskManager::new(config.page_size));

        let mut engine =
            Self::from_parts(Box::new(backend), disk, config).expect("Failed to assemble engine");
        engine.log_path = Some(log_path);
        engine._temp_dir = Some(Arc::new(temp_dir));
        engine
            .recovery
            .initialize()
            .expect("Failed to initialize engine");
        engine
    }

    /// Assembles an engine over an existing log backend and disk.
    ///
    /// Nothing is initialized or recovered; call
    /// [`RecoveryManager::initialize`] for a fresh log or
    /// [`RecoveryManager::restart`] for one that saw a crash.
    pub fn from_parts(
        backend: Box<dyn StorageBackend>,
        disk: Arc<MemoryDiskManager>,
        config: Config,
    ) -> CoreResult<Self> {
        let locks = Arc::new(LockManager::new());
        let transactions = Arc::new(TransactionManager::new(Arc::clone(&locks)));
        let log = Arc::new(LogManager::open(backend, &config)?);
        let buffer = Arc::new(MemoryBufferManager::new(
            Arc::clone(&disk) as Arc<dyn DiskSpaceManager>
        ));
        let recovery = RecoveryManager::new(
            locks.database_context(),
            log,
            Arc::clone(&disk) as Arc<dyn DiskSpaceManager>,
            buffer as Arc<dyn BufferManager>,
            Arc::clone(&transactions) as Arc<dyn TransactionFactory>,
            config.clone(),
        );
        Ok(Self {
            locks,
            transactions,
            disk,
            recovery,
            config,
            log_path: None,
            _temp_dir: None,
        })
    }

    /// Simulates a crash: a new engine over the same disk and the durable
    /// part of the log. The new engine has not been recovered yet.
    pub fn crash(&self) -> CoreResult<Self> {
        let backend: Box<dyn StorageBackend> = match &self.log_path {
            Some(path) => Box::new(FileBackend::open_existing(path)?),
            None => Box::new(InMemoryBackend::with_data(
                self.recovery.log().durable_contents()?,
            )),
        };
        let mut engine = Self::from_parts(backend, Arc::clone(&self.disk), self.config.clone())?;
        engine.log_path.clone_from(&self.log_path);
        engine._temp_dir.clone_from(&self._temp_dir);
        Ok(engine)
    }

    /// Crashes and runs every restart pass.
    pub fn crash_and_recover(&self) -> CoreResult<Self> {
        let engine = self.crash()?;
        engine.recovery.restart()?.run()?;
        Ok(engine)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the log.
    pub fn log(&self) -> &Arc<LogManager> {
        self.recovery.log()
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Arc<TransactionContext> {
        let txn = self.transactions.begin();
        self.recovery.start_transaction(&txn);
        txn
    }

    /// Returns the lock context of `page`.
    pub fn page_context(&self, page: PageNum) -> LockContext {
        self.recovery.page_lock_context(page)
    }

    /// Locks and allocates `page`, allocating its partition if needed.
    pub fn alloc_page(&self, txn: &Arc<TransactionContext>, page: PageNum) -> CoreResult<()> {
        ensure_sufficient_lock_held(&self.page_context(page), Some(txn), LockType::Exclusive)?;
        if !self.disk.is_part_allocated(page.partition()) {
            self.recovery.log_alloc_part(txn.id(), page.partition())?;
            self.disk.alloc_part(page.partition())?;
        }
        self.recovery.log_alloc_page(txn.id(), page)?;
        self.disk.alloc_page(page)
    }

    /// Locks and frees `page`.
    pub fn free_page(&self, txn: &Arc<TransactionContext>, page: PageNum) -> CoreResult<()> {
        ensure_sufficient_lock_held(&self.page_context(page), Some(txn), LockType::Exclusive)?;
        self.recovery.log_free_page(txn.id(), page)?;
        self.recovery.buffer().free_page(page)
    }

    /// Locks `page`, logs the write and applies it to the cached page.
    pub fn write(
        &self,
        txn: &Arc<TransactionContext>,
        page: PageNum,
        offset: u16,
        data: &[u8],
    ) -> CoreResult<Lsn> {
        ensure_sufficient_lock_held(&self.page_context(page), Some(txn), LockType::Exclusive)?;
        let handle = self.recovery.buffer().fetch_page(page)?;
        let before = handle.read(usize::from(offset), data.len())?;
        let lsn = self
            .recovery
            .log_page_write(txn.id(), page, offset, &before, data)?;
        handle.write(usize::from(offset), data)?;
        handle.set_page_lsn(lsn);
        Ok(lsn)
    }

    /// Reads page bytes under a shared lock.
    pub fn read_as(
        &self,
        txn: &Arc<TransactionContext>,
        page: PageNum,
        offset: usize,
        len: usize,
    ) -> CoreResult<Vec<u8>> {
        ensure_sufficient_lock_held(&self.page_context(page), Some(txn), LockType::Shared)?;
        self.read(page, offset, len)
    }

    /// Reads page bytes without locking.
    pub fn read(&self, page: PageNum, offset: usize, len: usize) -> CoreResult<Vec<u8>> {
        self.recovery.buffer().fetch_page(page)?.read(offset, len)
    }

    /// Commits, ends and cleans up `txn`.
    pub fn commit(&self, txn: &Arc<TransactionContext>) -> CoreResult<()> {
        self.recovery.commit(txn.id())?;
        self.recovery.end(txn.id())?;
        txn.cleanup();
        Ok(())
    }

    /// Aborts, rolls back and cleans up `txn`.
    pub fn abort(&self, txn: &Arc<TransactionContext>) -> CoreResult<()> {
        self.recovery.abort(txn.id())?;
        self.recovery.end(txn.id())?;
        txn.cleanup();
        Ok(())
    }

    /// Writes every dirty page to disk.
    pub fn flush_pages(&self) -> CoreResult<()> {
        self.recovery.buffer().flush_all()
    }

    /// Makes the whole log durable.
    pub fn flush_log(&self) -> CoreResult<()> {
        let log = self.log();
        log.flush_to_lsn(log.next_lsn())
    }
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("recovery", &self.recovery)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}
