//! In-memory page cache.

use super::{BufferManager, DiskSpaceManager, WalHooks};
use crate::config::PAGE_HEADER_SIZE;
use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, PageNum, PartitionId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

struct Frame {
    data: Vec<u8>,
    dirty: bool,
}

/// Handle to a cached page.
///
/// Handles stay valid after the frame is evicted; writes through a stale
/// handle are simply lost.
#[derive(Clone)]
pub struct Page {
    num: PageNum,
    frame: Arc<Mutex<Frame>>,
}

impl Page {
    /// Returns the page number.
    #[must_use]
    pub fn page_num(&self) -> PageNum {
        self.num
    }

    /// Returns the LSN of the last record applied to the page.
    #[must_use]
    pub fn page_lsn(&self) -> Option<Lsn> {
        let frame = self.frame.lock();
        Lsn::decode_optional(read_header(&frame.data))
    }

    /// Stamps the page with `lsn` and marks it dirty.
    pub fn set_page_lsn(&self, lsn: Lsn) {
        let mut frame = self.frame.lock();
        frame.data[..PAGE_HEADER_SIZE].copy_from_slice(&lsn.as_u64().to_le_bytes());
        frame.dirty = true;
    }

    /// Returns true if the page has unflushed changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.frame.lock().dirty
    }

    /// Reads `len` bytes at `offset` in the data region.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the range leaves the page.
    pub fn read(&self, offset: usize, len: usize) -> CoreResult<Vec<u8>> {
        let frame = self.frame.lock();
        let range = data_range(&frame.data, offset, len)?;
        Ok(frame.data[range].to_vec())
    }

    /// Writes `data` at `offset` in the data region and marks the page dirty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the range leaves the page.
    pub fn write(&self, offset: usize, data: &[u8]) -> CoreResult<()> {
        let mut frame = self.frame.lock();
        let range = data_range(&frame.data, offset, data.len())?;
        frame.data[range].copy_from_slice(data);
        frame.dirty = true;
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("num", &self.num)
            .field("page_lsn", &self.page_lsn())
            .finish_non_exhaustive()
    }
}

fn read_header(data: &[u8]) -> u64 {
    let mut header = [0u8; PAGE_HEADER_SIZE];
    header.copy_from_slice(&data[..PAGE_HEADER_SIZE]);
    u64::from_le_bytes(header)
}

fn data_range(data: &[u8], offset: usize, len: usize) -> CoreResult<std::ops::Range<usize>> {
    let start = PAGE_HEADER_SIZE + offset;
    let end = start + len;
    if end > data.len() {
        return Err(CoreError::invalid_operation(format!(
            "range {offset}..{} exceeds page data of {} bytes",
            offset + len,
            data.len() - PAGE_HEADER_SIZE
        )));
    }
    Ok(start..end)
}

/// Unbounded page cache over a [`DiskSpaceManager`].
///
/// Pages stay cached until flushed and evicted explicitly. Dropping the
/// cache loses every unflushed change, which is how tests simulate a crash.
pub struct MemoryBufferManager {
    disk: Arc<dyn DiskSpaceManager>,
    frames: Mutex<HashMap<PageNum, Arc<Mutex<Frame>>>>,
    hooks: RwLock<Option<Weak<dyn WalHooks>>>,
}

impl MemoryBufferManager {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(disk: Arc<dyn DiskSpaceManager>) -> Self {
        Self {
            disk,
            frames: Mutex::new(HashMap::new()),
            hooks: RwLock::new(None),
        }
    }

    fn hooks(&self) -> Option<Arc<dyn WalHooks>> {
        self.hooks.read().as_ref().and_then(Weak::upgrade)
    }

    fn frame(&self, page: PageNum) -> Option<Arc<Mutex<Frame>>> {
        self.frames.lock().get(&page).cloned()
    }

    fn write_back(&self, page: PageNum, frame: &Arc<Mutex<Frame>>) -> CoreResult<()> {
        let mut frame = frame.lock();
        if !frame.dirty {
            return Ok(());
        }
        let hooks = self.hooks();
        if let Some(hooks) = &hooks {
            hooks.page_flush_hook(Lsn::decode_optional(read_header(&frame.data)))?;
        }
        self.disk.write_page(page, &frame.data)?;
        frame.dirty = false;
        drop(frame);

        trace!(page = %page, "page written");
        if let Some(hooks) = &hooks {
            hooks.disk_io_hook(page);
        }
        Ok(())
    }
}

impl BufferManager for MemoryBufferManager {
    fn fetch_page(&self, page: PageNum) -> CoreResult<Page> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&page) {
            return Ok(Page {
                num: page,
                frame: Arc::clone(frame),
            });
        }
        let data = self.disk.read_page(page)?;
        let frame = Arc::new(Mutex::new(Frame { data, dirty: false }));
        frames.insert(page, Arc::clone(&frame));
        Ok(Page { num: page, frame })
    }

    fn iter_page_nums(&self, f: &mut dyn FnMut(PageNum, bool)) {
        let snapshot: Vec<(PageNum, Arc<Mutex<Frame>>)> = self
            .frames
            .lock()
            .iter()
            .map(|(num, frame)| (*num, Arc::clone(frame)))
            .collect();
        for (num, frame) in snapshot {
            let dirty = frame.lock().dirty;
            f(num, dirty);
        }
    }

    fn flush_page(&self, page: PageNum) -> CoreResult<()> {
        match self.frame(page) {
            Some(frame) => self.write_back(page, &frame),
            None => Ok(()),
        }
    }

    fn flush_all(&self) -> CoreResult<()> {
        let mut snapshot: Vec<(PageNum, Arc<Mutex<Frame>>)> = self
            .frames
            .lock()
            .iter()
            .map(|(num, frame)| (*num, Arc::clone(frame)))
            .collect();
        snapshot.sort_by_key(|(num, _)| *num);
        for (num, frame) in &snapshot {
            self.write_back(*num, frame)?;
        }
        Ok(())
    }

    fn evict_page(&self, page: PageNum) -> CoreResult<()> {
        self.flush_page(page)?;
        self.frames.lock().remove(&page);
        Ok(())
    }

    fn free_page(&self, page: PageNum) -> CoreResult<()> {
        self.frames.lock().remove(&page);
        self.disk.free_page(page)
    }

    fn free_part(&self, part: PartitionId) -> CoreResult<()> {
        self.frames.lock().retain(|num, _| num.partition() != part);
        self.disk.free_part(part)
    }

    fn set_wal_hooks(&self, hooks: Weak<dyn WalHooks>) {
        *self.hooks.write() = Some(hooks);
    }
}

impl std::fmt::Debug for MemoryBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBufferManager")
            .field("cached", &self.frames.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryDiskManager;

    const PAGE_SIZE: usize = 64;

    fn setup() -> (Arc<MemoryDiskManager>, MemoryBufferManager, PageNum) {
        let disk = Arc::new(MemoryDiskManager::new(PAGE_SIZE));
        let part = PartitionId::new(1);
        let page = PageNum::new(part, 0);
        disk.alloc_part(part).unwrap();
        disk.alloc_page(page).unwrap();
        let buffer = MemoryBufferManager::new(Arc::clone(&disk) as Arc<dyn DiskSpaceManager>);
        (disk, buffer, page)
    }

    #[derive(Default)]
    struct RecordingHooks {
        flushed_to: Mutex<Vec<Option<Lsn>>>,
        written: Mutex<Vec<PageNum>>,
    }

    impl WalHooks for RecordingHooks {
        fn page_flush_hook(&self, page_lsn: Option<Lsn>) -> CoreResult<()> {
            self.flushed_to.lock().push(page_lsn);
            Ok(())
        }

        fn disk_io_hook(&self, page: PageNum) {
            self.written.lock().push(page);
        }
    }

    #[test]
    fn writes_stay_in_cache_until_flushed() {
        let (disk, buffer, page) = setup();
        let handle = buffer.fetch_page(page).unwrap();
        assert_eq!(handle.page_lsn(), None);

        handle.write(4, b"abc").unwrap();
        handle.set_page_lsn(Lsn::new(120));
        assert!(handle.is_dirty());
        assert_eq!(disk.read_page(page).unwrap(), vec![0; PAGE_SIZE]);

        buffer.flush_page(page).unwrap();
        let image = disk.read_page(page).unwrap();
        assert_eq!(&image[..8], &120u64.to_le_bytes());
        assert_eq!(&image[12..15], b"abc");
        assert!(!handle.is_dirty());
    }

    #[test]
    fn fetching_alone_leaves_the_page_clean() {
        let (_disk, buffer, page) = setup();
        let handle = buffer.fetch_page(page).unwrap();
        assert_eq!(handle.read(0, 4).unwrap(), vec![0; 4]);
        assert!(!handle.is_dirty());

        let mut dirty = Vec::new();
        buffer.iter_page_nums(&mut |num, is_dirty| dirty.push((num, is_dirty)));
        assert_eq!(dirty, vec![(page, false)]);

        buffer.fetch_page(page).unwrap().set_page_lsn(Lsn::new(9));
        assert!(handle.is_dirty());
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let (_disk, buffer, page) = setup();
        let handle = buffer.fetch_page(page).unwrap();
        let effective = PAGE_SIZE - PAGE_HEADER_SIZE;
        assert!(handle.write(effective - 2, &[1, 2]).is_ok());
        assert!(handle.write(effective - 1, &[1, 2]).is_err());
        assert!(handle.read(effective, 1).is_err());
    }

    #[test]
    fn hooks_bracket_the_disk_write() {
        let (_disk, buffer, page) = setup();
        let hooks = Arc::new(RecordingHooks::default());
        buffer.set_wal_hooks(Arc::downgrade(&(Arc::clone(&hooks) as Arc<dyn WalHooks>)));

        let handle = buffer.fetch_page(page).unwrap();
        handle.write(0, &[7]).unwrap();
        handle.set_page_lsn(Lsn::new(77));
        buffer.flush_all().unwrap();
        buffer.flush_all().unwrap();

        assert_eq!(*hooks.flushed_to.lock(), vec![Some(Lsn::new(77))]);
        assert_eq!(*hooks.written.lock(), vec![page]);
    }

    #[test]
    fn dropping_the_cache_loses_unflushed_writes() {
        let (disk, buffer, page) = setup();
        buffer.fetch_page(page).unwrap().write(0, &[1, 2, 3]).unwrap();
        drop(buffer);

        let buffer = MemoryBufferManager::new(disk as Arc<dyn DiskSpaceManager>);
        let handle = buffer.fetch_page(page).unwrap();
        assert_eq!(handle.read(0, 3).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn iterating_reports_dirty_flags() {
        let (disk, buffer, page) = setup();
        let other = PageNum::new(PartitionId::new(1), 1);
        disk.alloc_page(other).unwrap();

        buffer.fetch_page(page).unwrap().write(0, &[1]).unwrap();
        buffer.fetch_page(other).unwrap();

        let mut seen = Vec::new();
        buffer.iter_page_nums(&mut |num, dirty| seen.push((num, dirty)));
        seen.sort();
        assert_eq!(seen, vec![(page, true), (other, false)]);
    }

    #[test]
    fn free_page_discards_the_frame() {
        let (disk, buffer, page) = setup();
        buffer.fetch_page(page).unwrap().write(0, &[1]).unwrap();
        buffer.free_page(page).unwrap();

        assert!(!disk.is_page_allocated(page));
        assert!(buffer.fetch_page(page).is_err());
        let mut count = 0;
        buffer.iter_page_nums(&mut |_, _| count += 1);
        assert_eq!(count, 0);
    }
}
