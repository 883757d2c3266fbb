//! Log manager: appends, flushes and reads records.

use super::iterator::{encode_frame, read_frame, LogScan};
use super::record::LogRecord;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;
use parking_lot::Mutex;
use tessera_storage::StorageBackend;
use tracing::{debug, trace, warn};

pub(crate) struct LogInner {
    backend: Box<dyn StorageBackend>,
    /// Bytes handed to the backend.
    written_end: u64,
    /// Bytes of the backend known to be durable.
    durable_end: u64,
    /// Encoded frames not yet handed to the backend.
    pending: Vec<u8>,
}

impl LogInner {
    fn end(&self) -> u64 {
        self.written_end + self.pending.len() as u64
    }

    /// Reads `len` bytes at `offset` across the durable and pending parts.
    ///
    /// Returns `Ok(None)` if the range extends past the end of the log.
    pub(crate) fn read_bytes(&self, offset: u64, len: usize) -> CoreResult<Option<Vec<u8>>> {
        let end = offset + len as u64;
        if end > self.end() {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(len);
        if offset < self.written_end {
            let written_len = (end.min(self.written_end) - offset) as usize;
            out.extend_from_slice(&self.backend.read_at(offset, written_len)?);
        }
        if end > self.written_end {
            let start = offset.saturating_sub(self.written_end) as usize;
            let stop = (end - self.written_end) as usize;
            out.extend_from_slice(&self.pending[start..stop]);
        }
        Ok(Some(out))
    }

    /// Hands pending frames to the backend, then flushes it.
    ///
    /// Frames the backend accepted are never handed over twice, so a flush
    /// that failed can simply be retried.
    fn flush(&mut self) -> CoreResult<()> {
        if !self.pending.is_empty() {
            let offset = self.backend.append(&self.pending)?;
            if offset != self.written_end {
                return Err(CoreError::log_corruption(format!(
                    "log backend grew to {offset} behind the log's back (expected {})",
                    self.written_end
                )));
            }
            self.written_end += self.pending.len() as u64;
            self.pending.clear();
        }
        if self.durable_end < self.written_end {
            self.backend.flush()?;
            self.durable_end = self.written_end;
        }
        Ok(())
    }
}

/// Append-only log of LSN-addressed records.
///
/// An LSN is the byte offset of a record's frame. The first frame is the
/// master record, which is rewritten in place and never appended again.
/// Appends are buffered in memory until [`flush_to_lsn`](Self::flush_to_lsn)
/// (or every append, with [`Config::flush_on_append`]).
pub struct LogManager {
    inner: Mutex<LogInner>,
    flush_on_append: bool,
}

impl LogManager {
    /// Opens the log stored in `backend`.
    ///
    /// An empty backend gets a fresh master record. Otherwise the master
    /// record is validated and the log scanned to its end; a torn final
    /// record left by a crash is cut off.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] or [`CoreError::ChecksumMismatch`]
    /// if a complete frame is damaged, or a storage error.
    pub fn open(mut backend: Box<dyn StorageBackend>, config: &Config) -> CoreResult<Self> {
        let size = backend.size()?;
        let mut inner = if size == 0 {
            let frame = encode_frame(&LogRecord::Master {
                last_checkpoint: Lsn::MASTER,
            })?;
            backend.append(&frame)?;
            backend.flush()?;
            LogInner {
                backend,
                written_end: frame.len() as u64,
                durable_end: frame.len() as u64,
                pending: Vec::new(),
            }
        } else {
            LogInner {
                backend,
                written_end: size,
                durable_end: size,
                pending: Vec::new(),
            }
        };

        let mut offset = match read_frame(&inner, Lsn::MASTER.as_u64())? {
            Some((LogRecord::Master { .. }, next)) => next,
            _ => return Err(CoreError::log_corruption("log does not start with a master record")),
        };
        let mut records = 0usize;
        while let Some((_, next)) = read_frame(&inner, offset)? {
            offset = next;
            records += 1;
        }
        if offset < inner.durable_end {
            warn!(
                valid_end = offset,
                size = inner.durable_end,
                "truncating torn record at end of log"
            );
            inner.backend.truncate(offset)?;
            inner.backend.flush()?;
            inner.written_end = offset;
            inner.durable_end = offset;
        }
        debug!(records, end = offset, "opened log");

        Ok(Self {
            inner: Mutex::new(inner),
            flush_on_append: config.flush_on_append,
        })
    }

    /// Appends a record and returns its LSN.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded, or a storage error
    /// when flushing on append.
    pub fn append(&self, record: &LogRecord) -> CoreResult<Lsn> {
        let frame = encode_frame(record)?;
        let mut inner = self.inner.lock();
        let lsn = Lsn::new(inner.end());
        inner.pending.extend_from_slice(&frame);
        if self.flush_on_append {
            inner.flush()?;
        }
        trace!(lsn = %lsn, kind = ?record.record_type(), "appended log record");
        Ok(lsn)
    }

    /// Makes every record up to and including `lsn` durable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn flush_to_lsn(&self, lsn: Lsn) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if lsn.as_u64() >= inner.durable_end {
            inner.flush()?;
        }
        Ok(())
    }

    /// Returns true if the record at `lsn` is durable.
    #[must_use]
    pub fn is_durable(&self, lsn: Lsn) -> bool {
        lsn.as_u64() < self.inner.lock().durable_end
    }

    /// Returns the LSN the next appended record will get.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        Lsn::new(self.inner.lock().end())
    }

    /// Reads the record at `lsn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if no record starts at `lsn`.
    pub fn fetch(&self, lsn: Lsn) -> CoreResult<LogRecord> {
        let inner = self.inner.lock();
        read_frame(&inner, lsn.as_u64())?
            .map(|(record, _)| record)
            .ok_or_else(|| CoreError::log_corruption(format!("no log record at {lsn}")))
    }

    /// Scans records from `lsn` to the end of the log.
    #[must_use]
    pub fn scan_from(&self, lsn: Lsn) -> LogScan<'_> {
        LogScan::new(self, lsn)
    }

    /// Scans the whole log, master record first.
    #[must_use]
    pub fn iter(&self) -> LogScan<'_> {
        self.scan_from(Lsn::MASTER)
    }

    /// Returns the begin-checkpoint LSN stored in the master record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if the master slot is damaged.
    pub fn master_record(&self) -> CoreResult<Lsn> {
        match self.fetch(Lsn::MASTER)? {
            LogRecord::Master { last_checkpoint } => Ok(last_checkpoint),
            other => Err(CoreError::log_corruption(format!(
                "expected master record, found {:?}",
                other.record_type()
            ))),
        }
    }

    /// Points the master record at `last_checkpoint` and makes it durable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write or flush fails.
    pub fn rewrite_master_record(&self, last_checkpoint: Lsn) -> CoreResult<()> {
        let frame = encode_frame(&LogRecord::Master { last_checkpoint })?;
        let mut inner = self.inner.lock();
        inner.backend.write_at(Lsn::MASTER.as_u64(), &frame)?;
        inner.backend.flush()?;
        debug!(checkpoint = %last_checkpoint, "rewrote master record");
        Ok(())
    }

    /// Returns a copy of the durable bytes of the log.
    ///
    /// Unflushed appends are not included, so reopening a log from these
    /// bytes behaves like a restart after a crash.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn durable_contents(&self) -> CoreResult<Vec<u8>> {
        let inner = self.inner.lock();
        let len = inner.durable_end as usize;
        Ok(inner.backend.read_at(0, len)?)
    }

    /// Flushes everything and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush or sync fails.
    pub fn close(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.flush()?;
        inner.backend.sync()?;
        Ok(())
    }

    pub(crate) fn with_inner<T>(&self, f: impl FnOnce(&LogInner) -> T) -> T {
        f(&*self.inner.lock())
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogManager")
            .field("written_end", &inner.written_end)
            .field("durable_end", &inner.durable_end)
            .field("pending", &inner.pending.len())
            .field("flush_on_append", &self.flush_on_append)
            .finish_non_exhaustive()
    }
}
