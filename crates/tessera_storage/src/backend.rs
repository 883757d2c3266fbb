//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store backing the write-ahead log.
///
/// # Invariants
///
/// - `append` returns the offset where data was written, which is the size
///   of the store before the call
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never grows the store
/// - `flush` makes every prior `append` and `write_at` durable
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes already present at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WritePastEnd`] if the range extends
    /// beyond the current size.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to cut a torn record off the tail of the log before appending.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
