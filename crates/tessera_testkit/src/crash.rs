//! Crash injection for the log backend.
//!
//! [`CrashableBackend`] is an in-memory log store that stops accepting
//! writes after a byte budget is spent. The write that crosses the budget
//! is torn: only its first bytes reach the store. The matching
//! [`CrashHandle`] arms the crash and reads back what survived, so a test
//! can reopen the log from exactly those bytes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::crash::CrashableBackend;
//!
//! let (backend, handle) = CrashableBackend::new();
//! // ... open a log over `backend`, do some work ...
//! handle.crash_after(10);
//! // ... the next flush tears after 10 bytes ...
//! let survivors = handle.surviving_bytes();
//! ```

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_storage::{StorageBackend, StorageError, StorageResult};

struct CrashState {
    data: Mutex<Vec<u8>>,
    /// Bytes that may still be appended before the crash.
    budget: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashState {
    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
    }

    fn check(&self, what: &str) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(self.crash(what));
        }
        Ok(())
    }
}

/// A log backend that can simulate a crash mid-write.
pub struct CrashableBackend {
    state: Arc<CrashState>,
}

/// Controls a [`CrashableBackend`] after it has been handed to a log.
#[derive(Clone)]
pub struct CrashHandle {
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates an empty backend and its handle.
    pub fn new() -> (Self, CrashHandle) {
        Self::with_data(Vec::new())
    }

    /// Creates a backend holding `data` and its handle.
    pub fn with_data(data: Vec<u8>) -> (Self, CrashHandle) {
        let state = Arc::new(CrashState {
            data: Mutex::new(data),
            budget: AtomicUsize::new(usize::MAX),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            CrashHandle { state },
        )
    }
}

impl CrashHandle {
    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        self.state.budget.store(bytes, Ordering::SeqCst);
    }

    /// Makes every later flush and sync crash.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.state.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Returns the bytes that reached the store.
    pub fn surviving_bytes(&self) -> Vec<u8> {
        self.state.data.lock().clone()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.state.data.lock();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.state.check("write")?;
        let mut data = self.state.data.lock();
        let offset = data.len() as u64;
        let budget = self.state.budget.load(Ordering::SeqCst);

        if bytes.len() > budget {
            // Torn write: only the bytes within budget land.
            data.extend_from_slice(&bytes[..budget]);
            self.state.budget.store(0, Ordering::SeqCst);
            return Err(self.state.crash("partial write"));
        }
        if budget != usize::MAX {
            self.state.budget.store(budget - bytes.len(), Ordering::SeqCst);
        }
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        self.state.check("write")?;
        let mut data = self.state.data.lock();
        let size = data.len() as u64;
        let end = offset.saturating_add(bytes.len() as u64);
        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }
        data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.state.check("flush")?;
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.state.crash("flush"));
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.data.lock().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.state.check("sync")?;
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.state.crash("sync"));
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.state.check("truncate")?;
        let mut data = self.state.data.lock();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("size", &self.state.data.lock().len())
            .field("crashed", &self.state.crashed.load(Ordering::SeqCst))
            .finish()
    }
}
