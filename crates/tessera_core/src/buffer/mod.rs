//! Page cache and disk allocation consumed by recovery.
//!
//! Every page starts with an 8-byte header holding its pageLSN, the LSN of
//! the last log record applied to it (0 if none). Callers address the bytes
//! after the header; offsets passed to [`Page::read`] and [`Page::write`]
//! are relative to that data region.
//!
//! The recovery manager registers itself as [`WalHooks`] so that a dirty
//! page only reaches disk after the log covering it is durable.

mod cache;
mod disk;

pub use cache::{MemoryBufferManager, Page};
pub use disk::MemoryDiskManager;

use crate::error::CoreResult;
use crate::types::{Lsn, PageNum, PartitionId};
use std::sync::Weak;

/// Partition and page allocation plus raw page I/O.
pub trait DiskSpaceManager: Send + Sync {
    /// Allocates `part`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidOperation`] if it already exists.
    fn alloc_part(&self, part: PartitionId) -> CoreResult<()>;

    /// Frees `part` and every page in it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PartitionNotAllocated`] if it does not exist.
    fn free_part(&self, part: PartitionId) -> CoreResult<()>;

    /// Allocates a zeroed page.
    ///
    /// # Errors
    ///
    /// Fails if the partition is missing or the page already exists.
    fn alloc_page(&self, page: PageNum) -> CoreResult<()>;

    /// Frees a page.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PageNotAllocated`] if it does not exist.
    fn free_page(&self, page: PageNum) -> CoreResult<()>;

    /// Returns true if `part` is allocated.
    fn is_part_allocated(&self, part: PartitionId) -> bool;

    /// Returns true if `page` is allocated.
    fn is_page_allocated(&self, page: PageNum) -> bool;

    /// Reads the full page image, header included.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PageNotAllocated`] if it does not exist.
    fn read_page(&self, page: PageNum) -> CoreResult<Vec<u8>>;

    /// Writes the full page image, header included.
    ///
    /// # Errors
    ///
    /// Fails if the page does not exist or `data` is not one page long.
    fn write_page(&self, page: PageNum, data: &[u8]) -> CoreResult<()>;
}

/// Callbacks from the page cache into the write-ahead log.
pub trait WalHooks: Send + Sync {
    /// Called before a dirty page is written; must make the log durable up
    /// to `page_lsn`.
    ///
    /// # Errors
    ///
    /// A failure aborts the page write.
    fn page_flush_hook(&self, page_lsn: Option<Lsn>) -> CoreResult<()>;

    /// Called after a page has been written to disk.
    fn disk_io_hook(&self, page: PageNum);
}

/// A cache of page frames over a [`DiskSpaceManager`].
pub trait BufferManager: Send + Sync {
    /// Returns a handle to the page, loading it from disk if needed.
    ///
    /// Fetching takes no locks and leaves the page clean. Callers lock the
    /// page beforehand, and writes through the handle mark it dirty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PageNotAllocated`] for unknown pages.
    fn fetch_page(&self, page: PageNum) -> CoreResult<Page>;

    /// Calls `f(page, dirty)` for every cached page.
    fn iter_page_nums(&self, f: &mut dyn FnMut(PageNum, bool));

    /// Writes the page to disk if it is dirty.
    ///
    /// # Errors
    ///
    /// Propagates hook and disk errors.
    fn flush_page(&self, page: PageNum) -> CoreResult<()>;

    /// Writes every dirty page to disk.
    ///
    /// # Errors
    ///
    /// Propagates hook and disk errors.
    fn flush_all(&self) -> CoreResult<()>;

    /// Flushes the page and drops it from the cache.
    ///
    /// # Errors
    ///
    /// Propagates hook and disk errors.
    fn evict_page(&self, page: PageNum) -> CoreResult<()>;

    /// Drops the cached frame without writing it and frees the page on disk.
    ///
    /// # Errors
    ///
    /// Propagates disk errors.
    fn free_page(&self, page: PageNum) -> CoreResult<()>;

    /// Drops every cached frame of `part` and frees the partition on disk.
    ///
    /// # Errors
    ///
    /// Propagates disk errors.
    fn free_part(&self, part: PartitionId) -> CoreResult<()>;

    /// Installs the write-ahead hooks.
    fn set_wal_hooks(&self, hooks: Weak<dyn WalHooks>);
}
