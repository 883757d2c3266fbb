//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory byte store.
///
/// Crash tests take a snapshot with [`InMemoryBackend::data`] and rebuild a
/// fresh backend from it with [`InMemoryBackend::with_data`].
///
/// ```rust
/// use tessera_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"record").unwrap(), 0);
/// assert_eq!(backend.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `data`, as if it had been read back from disk.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of every byte in the store.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
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
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_offsets_follow_size() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"defg").unwrap(), 3);
        assert_eq!(backend.size().unwrap(), 7);
    }

    #[test]
    fn read_outside_store_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn write_at_overwrites_in_place() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"0000tail").unwrap();
        backend.write_at(0, b"head").unwrap();
        assert_eq!(backend.data(), b"headtail");
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn write_at_cannot_grow() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.write_at(2, b"xy"),
            Err(StorageError::WritePastEnd { .. })
        ));
        assert_eq!(backend.data(), b"abc");
    }

    #[test]
    fn truncate_cuts_tail() {
        let mut backend = InMemoryBackend::with_data(b"keep-torn".to_vec());
        backend.truncate(4).unwrap();
        assert_eq!(backend.data(), b"keep");
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::InvalidTruncate { .. })
        ));
    }

    proptest! {
        #[test]
        fn appended_chunks_read_back(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..16)) {
            let mut backend = InMemoryBackend::new();
            let offsets: Vec<u64> = chunks.iter().map(|c| backend.append(c).unwrap()).collect();
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
