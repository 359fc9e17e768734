use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, TransactionId};

use super::lock_manager::LockManager;

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking state of a transaction. A transaction grows until it
/// releases its first lock, then shrinks; it may not acquire locks while
/// shrinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A page latch held by an in-flight index operation. Dropping it releases
/// the latch and the pin (write latches mark the page dirty if its data was
/// borrowed mutably).
pub enum PageLatch {
    Read(ReadPageGuard),
    Write(WritePageGuard),
}

impl PageLatch {
    pub fn page_id(&self) -> PageId {
        match self {
            PageLatch::Read(guard) => guard.page_id(),
            PageLatch::Write(guard) => guard.page_id(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            PageLatch::Read(guard) => guard.data(),
            PageLatch::Write(guard) => guard.data(),
        }
    }
}

/// Transaction context threaded through index and lock operations.
///
/// The lock sets and state are shared with the lock manager's deadlock
/// detector, which inspects and aborts transactions from its own thread, so
/// every field sits behind a lock. The page-latch set and deferred-deletion
/// set belong to whichever single thread is running an index operation on
/// this transaction.
pub struct Transaction {
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    /// RIDs this transaction holds shared locks on
    shared_lock_set: Mutex<HashSet<RecordId>>,
    /// RIDs this transaction holds exclusive locks on
    exclusive_lock_set: Mutex<HashSet<RecordId>>,
    /// Page latches held by the current index operation, in acquisition order
    page_set: Mutex<Vec<PageLatch>>,
    /// Pages scheduled for deletion once the current operation releases its latches
    deleted_page_set: Mutex<HashSet<PageId>>,
}

impl Transaction {
    pub fn new(id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            page_set: Mutex::new(Vec::new()),
            deleted_page_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn add_shared_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: RecordId) -> bool {
        self.shared_lock_set.lock().remove(&rid)
    }

    pub fn is_shared_locked(&self, rid: RecordId) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn add_exclusive_lock(&self, rid: RecordId) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: RecordId) -> bool {
        self.exclusive_lock_set.lock().remove(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: RecordId) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Snapshot of the shared lock set.
    pub fn shared_lock_rids(&self) -> Vec<RecordId> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    /// Snapshot of the exclusive lock set.
    pub fn exclusive_lock_rids(&self) -> Vec<RecordId> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    /// Appends a latch to the held-page set.
    pub fn add_into_page_set(&self, latch: PageLatch) {
        self.page_set.lock().push(latch);
    }

    pub fn holds_page(&self, page_id: PageId) -> bool {
        self.page_set
            .lock()
            .iter()
            .any(|latch| latch.page_id() == page_id)
    }

    /// Runs `f` against the data of a held page. None if the page is not in
    /// the latch set.
    pub fn with_page<R>(&self, page_id: PageId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let set = self.page_set.lock();
        set.iter()
            .find(|latch| latch.page_id() == page_id)
            .map(|latch| f(latch.data()))
    }

    /// Runs `f` against the mutable data of a write-latched held page.
    /// None if the page is not write-latched by this transaction.
    pub fn with_page_mut<R>(&self, page_id: PageId, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut set = self.page_set.lock();
        match set
            .iter_mut()
            .find(|latch| latch.page_id() == page_id)
        {
            Some(PageLatch::Write(guard)) => Some(f(guard.data_mut())),
            _ => None,
        }
    }

    /// Runs `f` against the mutable data of two distinct write-latched held
    /// pages at once (used when entries move between sibling nodes).
    pub fn with_pages_mut<R>(
        &self,
        a: PageId,
        b: PageId,
        f: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> Option<R> {
        if a == b {
            return None;
        }
        let mut set = self.page_set.lock();
        let ia = set.iter().position(|latch| latch.page_id() == a)?;
        let ib = set.iter().position(|latch| latch.page_id() == b)?;

        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (left, right) = set.split_at_mut(hi);
        let (first, second) = (&mut left[lo], &mut right[0]);
        let (latch_a, latch_b) = if ia < ib {
            (first, second)
        } else {
            (second, first)
        };

        match (latch_a, latch_b) {
            (PageLatch::Write(ga), PageLatch::Write(gb)) => Some(f(ga.data_mut(), gb.data_mut())),
            _ => None,
        }
    }

    /// Takes every held latch, in acquisition order. Dropping the returned
    /// latches releases them.
    pub fn drain_page_set(&self) -> Vec<PageLatch> {
        std::mem::take(&mut *self.page_set.lock())
    }

    /// Schedules a page for deletion after the current operation's latches
    /// are released.
    pub fn add_into_deleted_page_set(&self, page_id: PageId) {
        self.deleted_page_set.lock().insert(page_id);
    }

    /// Takes the set of pages scheduled for deletion.
    pub fn take_deleted_pages(&self) -> Vec<PageId> {
        self.deleted_page_set.lock().drain().collect()
    }
}

/// Hands out transaction contexts and finishes them, releasing every lock
/// they still hold through the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        Arc::new(Transaction::new(id, isolation_level))
    }

    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
    }

    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.shared_lock_rids() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_lock_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state_transitions() {
        let txn = Transaction::new(TransactionId::new(1), IsolationLevel::RepeatableRead);
        assert_eq!(txn.state(), TransactionState::Growing);

        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_transaction_lock_sets() {
        let txn = Transaction::new(TransactionId::new(1), IsolationLevel::RepeatableRead);
        let rid = RecordId::new(PageId::new(3), crate::common::SlotId::new(7));

        assert!(!txn.is_shared_locked(rid));
        txn.add_shared_lock(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(txn.remove_shared_lock(rid));
        assert!(!txn.remove_shared_lock(rid));
    }

    #[test]
    fn test_transaction_deleted_page_set() {
        let txn = Transaction::new(TransactionId::new(1), IsolationLevel::RepeatableRead);
        txn.add_into_deleted_page_set(PageId::new(4));
        txn.add_into_deleted_page_set(PageId::new(4));
        txn.add_into_deleted_page_set(PageId::new(9));

        let mut pages = txn.take_deleted_pages();
        pages.sort();
        assert_eq!(pages, vec![PageId::new(4), PageId::new(9)]);
        assert!(txn.take_deleted_pages().is_empty());
    }
}
