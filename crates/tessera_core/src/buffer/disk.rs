//! In-memory disk space manager.

use super::DiskSpaceManager;
use crate::error::{CoreError, CoreResult};
use crate::types::{PageNum, PartitionId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Partitions and pages held in memory.
///
/// Survives a simulated crash as long as the same instance is reused, which
/// makes it the "disk" for recovery tests.
pub struct MemoryDiskManager {
    page_size: usize,
    partitions: Mutex<HashMap<PartitionId, HashMap<u64, Vec<u8>>>>,
}

impl MemoryDiskManager {
    /// Creates an empty disk with the given page size.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the allocated pages of `part` in order.
    #[must_use]
    pub fn pages(&self, part: PartitionId) -> Vec<PageNum> {
        let partitions = self.partitions.lock();
        partitions
            .get(&part)
            .map(|pages| {
                pages
                    .keys()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .map(|index| PageNum::new(part, index))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DiskSpaceManager for MemoryDiskManager {
    fn alloc_part(&self, part: PartitionId) -> CoreResult<()> {
        let mut partitions = self.partitions.lock();
        if partitions.contains_key(&part) {
            return Err(CoreError::invalid_operation(format!(
                "{part} is already allocated"
            )));
        }
        partitions.insert(part, HashMap::new());
        Ok(())
    }

    fn free_part(&self, part: PartitionId) -> CoreResult<()> {
        self.partitions
            .lock()
            .remove(&part)
            .map(|_| ())
            .ok_or(CoreError::PartitionNotAllocated { partition: part })
    }

    fn alloc_page(&self, page: PageNum) -> CoreResult<()> {
        let mut partitions = self.partitions.lock();
        let pages = partitions
            .get_mut(&page.partition())
            .ok_or(CoreError::PartitionNotAllocated {
                partition: page.partition(),
            })?;
        if pages.contains_key(&page.index()) {
            return Err(CoreError::invalid_operation(format!(
                "{page} is already allocated"
            )));
        }
        pages.insert(page.index(), vec![0; self.page_size]);
        Ok(())
    }

    fn free_page(&self, page: PageNum) -> CoreResult<()> {
        self.partitions
            .lock()
            .get_mut(&page.partition())
            .and_then(|pages| pages.remove(&page.index()))
            .map(|_| ())
            .ok_or(CoreError::PageNotAllocated { page })
    }

    fn is_part_allocated(&self, part: PartitionId) -> bool {
        self.partitions.lock().contains_key(&part)
    }

    fn is_page_allocated(&self, page: PageNum) -> bool {
        self.partitions
            .lock()
            .get(&page.partition())
            .is_some_and(|pages| pages.contains_key(&page.index()))
    }

    fn read_page(&self, page: PageNum) -> CoreResult<Vec<u8>> {
        self.partitions
            .lock()
            .get(&page.partition())
            .and_then(|pages| pages.get(&page.index()))
            .cloned()
            .ok_or(CoreError::PageNotAllocated { page })
    }

    fn write_page(&self, page: PageNum, data: &[u8]) -> CoreResult<()> {
        if data.len() != self.page_size {
            return Err(CoreError::invalid_operation(format!(
                "page image is {} bytes, expected {}",
                data.len(),
                self.page_size
            )));
        }
        let mut partitions = self.partitions.lock();
        let slot = partitions
            .get_mut(&page.partition())
            .and_then(|pages| pages.get_mut(&page.index()))
            .ok_or(CoreError::PageNotAllocated { page })?;
        slot.copy_from_slice(data);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDiskManager")
            .field("page_size", &self.page_size)
            .field("partitions", &self.partitions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> PartitionId {
        PartitionId::new(n)
    }

    #[test]
    fn pages_need_a_partition() {
        let disk = MemoryDiskManager::new(64);
        let page = PageNum::new(part(1), 0);
        assert!(matches!(
            disk.alloc_page(page),
            Err(CoreError::PartitionNotAllocated { .. })
        ));

        disk.alloc_part(part(1)).unwrap();
        disk.alloc_page(page).unwrap();
        assert!(disk.is_page_allocated(page));
        assert_eq!(disk.read_page(page).unwrap(), vec![0; 64]);
        assert!(disk.alloc_page(page).is_err());
    }

    #[test]
    fn write_and_read_back() {
        let disk = MemoryDiskManager::new(16);
        let page = PageNum::new(part(2), 7);
        disk.alloc_part(part(2)).unwrap();
        disk.alloc_page(page).unwrap();

        disk.write_page(page, &[9; 16]).unwrap();
        assert_eq!(disk.read_page(page).unwrap(), vec![9; 16]);
        assert!(disk.write_page(page, &[1; 4]).is_err());
    }

    #[test]
    fn freeing_a_partition_drops_its_pages() {
        let disk = MemoryDiskManager::new(16);
        disk.alloc_part(part(1)).unwrap();
        disk.alloc_page(PageNum::new(part(1), 3)).unwrap();
        disk.alloc_page(PageNum::new(part(1), 1)).unwrap();
        assert_eq!(
            disk.pages(part(1)),
            vec![PageNum::new(part(1), 1), PageNum::new(part(1), 3)]
        );

        disk.free_part(part(1)).unwrap();
        assert!(!disk.is_part_allocated(part(1)));
        assert!(!disk.is_page_allocated(PageNum::new(part(1), 1)));
        assert!(matches!(
            disk.free_part(part(1)),
            Err(CoreError::PartitionNotAllocated { .. })
        ));
    }

    #[test]
    fn free_page_requires_allocation() {
        let disk = MemoryDiskManager::new(16);
        disk.alloc_part(part(1)).unwrap();
        assert!(matches!(
            disk.free_page(PageNum::new(part(1), 0)),
            Err(CoreError::PageNotAllocated { .. })
        ));
    }
}
