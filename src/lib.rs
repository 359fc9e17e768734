//! Quarry - the storage and concurrency core of a disk-oriented RDBMS
//!
//! This crate turns a fixed-size page file into a safe, concurrently
//! accessible, indexed table store. Four components carry the weight:
//!
//! - **Buffer Pool** (`buffer`): caches pages in a fixed set of frames and
//!   mediates all disk I/O
//!   - `BufferPoolManager`: page table, pin counts, dirty bits
//!   - `LruReplacer`: strict least-recently-used victim selection
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + page latch
//!
//! - **B+Tree Index** (`index`): a clustered, crabbing-latched map from
//!   keys to record identifiers, persistent across sessions via the header
//!   page
//!
//! - **Lock Manager** (`concurrency`): tuple-granularity two-phase locking
//!   with shared/exclusive modes, upgrades, and waits-for deadlock
//!   detection
//!
//! - **Storage Layer** (`storage`): the page file itself
//!   - `DiskManager`: reads, writes and allocates fixed-size pages
//!   - `DiskScheduler`: background disk I/O worker
//!   - `TablePage`: slotted tuple storage that RecordIds point into
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quarry::buffer::BufferPoolManager;
//! use quarry::concurrency::{IsolationLevel, LockManager, TransactionManager};
//! use quarry::index::{BTreeIndex, IntegerComparator};
//! use quarry::storage::disk::DiskManager;
//! use quarry::{RecordId, PageId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("quarry.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let lock_manager = Arc::new(LockManager::new());
//! let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));
//!
//! let index = BTreeIndex::new("orders_pk", bpm, Arc::new(IntegerComparator), 32, 32).unwrap();
//!
//! let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
//! let rid = RecordId::new(PageId::new(2), SlotId::new(0));
//! index.insert(42, rid, &txn).unwrap();
//! assert_eq!(index.get_value(42, &txn).unwrap(), Some(rid));
//! txn_manager.commit(&txn);
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, QuarryError, RecordId, Result, SlotId, TransactionId};
