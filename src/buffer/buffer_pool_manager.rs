use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::common::{FrameId, PageId, QuarryError, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruReplacer, Page, ReadPageGuard, WritePageGuard};

/// Mutable pool bookkeeping; a frame is in exactly one of three states:
/// on the free list, pinned, or tracked by the replacer as evictable.
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page at all
    free_list: VecDeque<FrameId>,
}

/// State shared between the manager and the page guards it hands out.
pub(crate) struct PoolState {
    frames: Vec<Arc<Page>>,
    inner: Mutex<PoolInner>,
    replacer: LruReplacer,
}

impl PoolState {
    /// Gives back one pin on a page, OR-accumulating the dirty flag.
    /// Returns false if the page is not resident or not pinned.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }

        match frame.unpin() {
            None => false,
            Some(0) => {
                self.replacer.unpin(frame_id);
                true
            }
            Some(_) => true,
        }
    }
}

/// BufferPoolManager caches database pages in a fixed set of frames and
/// mediates every disk access. Frames come from the free list first, then
/// from the LRU replacer; the only reportable failure is pool exhaustion
/// when every frame is pinned.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state, also referenced by outstanding page guards
    state: Arc<PoolState>,
    /// Disk scheduler for I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Page::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Fetches a page into the buffer pool, pinning it.
    /// The caller owns one pin and must give it back with `unpin_page`
    /// (or use the `checked_*_page` guards, which do so automatically).
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        if page_id == INVALID_PAGE_ID {
            return Err(QuarryError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);

        Ok(Arc::clone(frame))
    }

    /// Allocates a brand new page, pinned, and returns a write guard over
    /// its zeroed contents. Fails with `BufferPoolFull` iff every frame is
    /// pinned.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let mut inner = self.state.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);
        drop(inner);

        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        // Safety: the frame outlives the guard via the Arc it carries
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Gives back one pin on a page, OR-accumulating the dirty flag.
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin_page(page_id, is_dirty)
    }

    /// Fetches a page for read access; the guard pins and read-latches it.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        // Safety: the frame outlives the guard via the Arc it carries
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Fetches a page for write access; the guard pins and write-latches it.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        // Safety: the frame outlives the guard via the Arc it carries
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Unconditionally writes a resident page's bytes to disk. Returns
    /// false if the page is not resident. The dirty bit is left untouched:
    /// flushing forces bytes out, it does not mark the page clean.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(QuarryError::InvalidPageId(page_id));
        }

        let inner = self.state.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;

        Ok(true)
    }

    /// Flushes every resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.state.inner.lock();

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.state.frames[frame_id.as_usize()];

            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        Ok(())
    }

    /// Deletes a page from the buffer pool and deallocates it on disk.
    /// Succeeds idempotently if the page is not resident; fails if pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Err(QuarryError::PageStillPinned(page_id));
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        inner.page_table.remove(&page_id);
        self.state.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        self.disk_scheduler.disk_manager().deallocate_page(page_id);

        Ok(true)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();

        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Picks a frame for a new resident page: free list first, then the
    /// replacer's victim (written back first if dirty).
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.state.replacer.victim() else {
            return Err(QuarryError::BufferPoolFull);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
        }
        trace!("evicting {} from frame {}", old_page_id, frame_id);

        inner.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}
