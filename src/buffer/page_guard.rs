use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolState;
use super::Page;

/// RAII guard for read access to a page: holds one pin and the page's read
/// latch for its lifetime, and releases both (clean) on drop.
pub struct ReadPageGuard {
    page_id: PageId,
    pool: Arc<PoolState>,
    /// Keeps the frame alive for as long as the data guard is held
    _frame: Arc<Page>,
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The data guard is transmuted to a `'static` lifetime; this is sound
    /// because the frame it borrows from is kept alive by `_frame` and the
    /// guard is dropped before the `Arc` in our `Drop` impl.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Page>, pool: Arc<PoolState>) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            pool,
            _frame: frame,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before giving the pin back
        self.data_guard.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for write access to a page: holds one pin and the page's write
/// latch. Dropping it releases both; the frame is marked dirty iff the data
/// was actually borrowed mutably.
pub struct WritePageGuard {
    page_id: PageId,
    pool: Arc<PoolState>,
    _frame: Arc<Page>,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    written: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same lifetime argument as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Page>, pool: Arc<PoolState>) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            pool,
            _frame: frame,
            data_guard: Some(data_guard),
            written: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable reference to the page data and marks it dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.written = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.pool.unpin_page(self.page_id, self.written);
    }
}
