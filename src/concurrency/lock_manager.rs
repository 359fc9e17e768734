use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{
    AbortReason, QuarryError, RecordId, Result, TransactionId, CYCLE_DETECTION_INTERVAL,
};

use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Lock mode requested on a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One transaction's position in a tuple's request queue.
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    granted: bool,
}

/// Request queue for a single RID. At any moment either one exclusive
/// request is granted (`is_writing`) or zero or more shared requests are
/// (`share_count`); arrival order is preserved.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cvar: Arc<Condvar>,
    share_count: usize,
    is_writing: bool,
    /// At most one transaction may be upgrading its lock on this RID
    upgrading: bool,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cvar: Arc::new(Condvar::new()),
            share_count: 0,
            is_writing: false,
            upgrading: false,
        }
    }

    fn remove_request(&mut self, txn_id: TransactionId) -> Option<LockRequest> {
        let pos = self.requests.iter().position(|r| r.txn_id == txn_id)?;
        self.requests.remove(pos)
    }
}

/// Everything behind the lock manager's single latch: the lock table, the
/// transactions it has seen (for the detector), and the waits-for graph.
/// The graph uses ordered maps so cycle detection and victim selection are
/// deterministic.
struct LockTable {
    queues: HashMap<RecordId, LockRequestQueue>,
    transactions: HashMap<TransactionId, Arc<Transaction>>,
    waits_for: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

/// Tuple-granularity lock manager implementing strict two-phase locking
/// with shared/exclusive modes, lock upgrades, and a background deadlock
/// detector that aborts the youngest transaction on each cycle.
pub struct LockManager {
    table: Arc<Mutex<LockTable>>,
    shutdown: Arc<AtomicBool>,
    detector_handle: Option<JoinHandle<()>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_interval(CYCLE_DETECTION_INTERVAL)
    }

    /// Creates a lock manager whose deadlock detector runs at the given
    /// interval.
    pub fn with_interval(cycle_detection_interval: Duration) -> Self {
        let table = Arc::new(Mutex::new(LockTable {
            queues: HashMap::new(),
            transactions: HashMap::new(),
            waits_for: BTreeMap::new(),
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let table_clone = Arc::clone(&table);
        let shutdown_clone = Arc::clone(&shutdown);
        let detector_handle = thread::spawn(move || {
            Self::run_cycle_detection(table_clone, shutdown_clone, cycle_detection_interval);
        });

        Self {
            table,
            shutdown,
            detector_handle: Some(detector_handle),
        }
    }

    /// Acquires a shared lock on `rid`, suspending until no exclusive lock
    /// is granted. Aborts the transaction on isolation/2PL violations or
    /// when it is chosen as a deadlock victim while waiting.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        let mut table = self.table.lock();

        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.state() == TransactionState::Shrinking {
            return Err(abort(txn, AbortReason::LockOnShrinking));
        }

        table.transactions.insert(txn.id(), Arc::clone(txn));
        let queue = table
            .queues
            .entry(rid)
            .or_insert_with(LockRequestQueue::new);
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        let cvar = Arc::clone(&queue.cvar);

        trace!("{} waiting for {} s-lock", txn.id(), rid);
        loop {
            let writing = table.queues.get(&rid).is_some_and(|q| q.is_writing);
            if !writing || txn.state() == TransactionState::Aborted {
                break;
            }
            cvar.wait(&mut table);
        }

        // Aborted while blocked: clean up our own entry and surface it.
        // Granting the lock anyway would strand it forever.
        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                queue.remove_request(txn.id());
            }
            return Err(deadlock_abort(txn));
        }

        if let Some(queue) = table.queues.get_mut(&rid) {
            if let Some(req) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                req.granted = true;
            }
            queue.share_count += 1;
        }
        txn.add_shared_lock(rid);
        trace!("{} granted {} s-lock", txn.id(), rid);
        Ok(true)
    }

    /// Acquires an exclusive lock on `rid`, suspending until no lock of
    /// either mode is granted.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        let mut table = self.table.lock();

        if txn.state() == TransactionState::Shrinking {
            return Err(abort(txn, AbortReason::LockOnShrinking));
        }

        table.transactions.insert(txn.id(), Arc::clone(txn));
        let queue = table
            .queues
            .entry(rid)
            .or_insert_with(LockRequestQueue::new);
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cvar = Arc::clone(&queue.cvar);

        trace!("{} waiting for {} x-lock", txn.id(), rid);
        loop {
            let busy = table
                .queues
                .get(&rid)
                .is_some_and(|q| q.is_writing || q.share_count > 0);
            if !busy || txn.state() == TransactionState::Aborted {
                break;
            }
            cvar.wait(&mut table);
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                queue.remove_request(txn.id());
            }
            return Err(deadlock_abort(txn));
        }

        if let Some(queue) = table.queues.get_mut(&rid) {
            if let Some(req) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                req.granted = true;
            }
            queue.is_writing = true;
        }
        txn.add_exclusive_lock(rid);
        trace!("{} granted {} x-lock", txn.id(), rid);
        Ok(true)
    }

    /// Upgrades this transaction's shared lock on `rid` to exclusive. Only
    /// one upgrade may be outstanding per RID; a second upgrader aborts.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        let mut table = self.table.lock();

        if txn.state() == TransactionState::Shrinking {
            return Err(abort(txn, AbortReason::LockOnShrinking));
        }

        let Some(queue) = table.queues.get_mut(&rid) else {
            return Ok(false);
        };
        if queue.upgrading {
            return Err(abort(txn, AbortReason::UpgradeConflict));
        }

        // Drop the shared grant and requeue the node as an ungranted
        // exclusive request in place.
        txn.remove_shared_lock(rid);
        queue.share_count = queue.share_count.saturating_sub(1);
        if let Some(req) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            req.mode = LockMode::Exclusive;
            req.granted = false;
        }
        queue.upgrading = true;
        let cvar = Arc::clone(&queue.cvar);

        trace!("{} upgrading lock on {}", txn.id(), rid);
        loop {
            let busy = table
                .queues
                .get(&rid)
                .is_some_and(|q| q.is_writing || q.share_count > 0);
            if !busy || txn.state() == TransactionState::Aborted {
                break;
            }
            cvar.wait(&mut table);
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                queue.remove_request(txn.id());
                queue.upgrading = false;
            }
            return Err(deadlock_abort(txn));
        }

        if let Some(queue) = table.queues.get_mut(&rid) {
            if let Some(req) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                req.granted = true;
            }
            queue.upgrading = false;
            queue.is_writing = true;
        }
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Releases this transaction's lock on `rid`. Returns false if the
    /// transaction holds no entry there. Moves GROWING transactions to
    /// SHRINKING, except when a shared lock is released under
    /// READ_COMMITTED (early S-release is not a phase change there).
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        let Some(queue) = table.queues.get_mut(&rid) else {
            return false;
        };
        let Some(removed) = queue.remove_request(txn.id()) else {
            return false;
        };

        if !(removed.mode == LockMode::Shared
            && txn.isolation_level() == IsolationLevel::ReadCommitted)
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        if removed.granted {
            match removed.mode {
                LockMode::Exclusive => {
                    queue.is_writing = false;
                    queue.cvar.notify_all();
                }
                LockMode::Shared => {
                    queue.share_count = queue.share_count.saturating_sub(1);
                    if queue.share_count == 0 {
                        queue.cvar.notify_all();
                    }
                }
            }
        } else {
            // A waiter gave up its place; the queue head may now be grantable
            queue.cvar.notify_all();
        }

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        trace!("{} released lock on {}", txn.id(), rid);
        true
    }

    /// Detector loop: periodically rebuilds the waits-for graph from the
    /// lock table and aborts victims until no cycle remains.
    fn run_cycle_detection(
        table: Arc<Mutex<LockTable>>,
        shutdown: Arc<AtomicBool>,
        interval: Duration,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(interval);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            let mut table = table.lock();
            Self::build_waits_for(&mut table);

            while let Some(victim_id) = Self::find_cycle_victim(&table.waits_for) {
                Self::abort_victim(&mut table, victim_id);
            }
        }
    }

    /// Rebuilds the waits-for graph from scratch: every ungranted request
    /// waits for every granted request on its queue.
    fn build_waits_for(table: &mut LockTable) {
        let mut waits_for: BTreeMap<TransactionId, BTreeSet<TransactionId>> = BTreeMap::new();

        for queue in table.queues.values() {
            let granted: Vec<TransactionId> = queue
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for waiter in queue.requests.iter().filter(|r| !r.granted) {
                let edges = waits_for.entry(waiter.txn_id).or_default();
                for &holder in &granted {
                    if holder != waiter.txn_id {
                        edges.insert(holder);
                    }
                }
            }
        }

        table.waits_for = waits_for;
    }

    /// Searches the graph for a cycle. Start vertices are visited in
    /// ascending id order and neighbors expand in ascending order, so the
    /// result is deterministic; the victim is the youngest (largest id)
    /// transaction on the active DFS stack when the cycle is closed.
    fn find_cycle_victim(
        waits_for: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
    ) -> Option<TransactionId> {
        let mut safe: BTreeSet<TransactionId> = BTreeSet::new();

        for &start in waits_for.keys() {
            if safe.contains(&start) {
                continue;
            }
            let mut active: BTreeSet<TransactionId> = BTreeSet::new();
            if Self::dfs(start, waits_for, &mut active, &mut safe) {
                return active.iter().max().copied();
            }
        }
        None
    }

    fn dfs(
        node: TransactionId,
        waits_for: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
        active: &mut BTreeSet<TransactionId>,
        safe: &mut BTreeSet<TransactionId>,
    ) -> bool {
        if active.contains(&node) {
            return true;
        }
        if safe.contains(&node) {
            return false;
        }

        active.insert(node);
        if let Some(neighbors) = waits_for.get(&node) {
            for &next in neighbors {
                if Self::dfs(next, waits_for, active, safe) {
                    return true;
                }
            }
        }
        active.remove(&node);
        safe.insert(node);
        false
    }

    /// Aborts a deadlock victim: marks it ABORTED, strips its granted
    /// entries (adjusting counters), broadcasts on every queue holding one
    /// of its entries so both the blocked cycle members and the victim
    /// itself wake up, and erases it from the graph. The victim removes its
    /// own waiting entry when it observes the aborted state.
    fn abort_victim(table: &mut LockTable, victim_id: TransactionId) {
        let Some(victim) = table.transactions.get(&victim_id).cloned() else {
            table.waits_for.remove(&victim_id);
            return;
        };

        info!("deadlock detected, aborting {}", victim_id);
        victim.set_state(TransactionState::Aborted);

        for rid in victim.shared_lock_rids() {
            if let Some(queue) = table.queues.get_mut(&rid) {
                if queue
                    .remove_request(victim_id)
                    .is_some_and(|r| r.granted)
                {
                    queue.share_count = queue.share_count.saturating_sub(1);
                    if queue.share_count == 0 {
                        queue.cvar.notify_all();
                    }
                }
            }
            victim.remove_shared_lock(rid);
        }

        for rid in victim.exclusive_lock_rids() {
            if let Some(queue) = table.queues.get_mut(&rid) {
                if queue
                    .remove_request(victim_id)
                    .is_some_and(|r| r.granted)
                {
                    queue.is_writing = false;
                    queue.cvar.notify_all();
                }
            }
            victim.remove_exclusive_lock(rid);
        }

        // Wake the victim wherever it is blocked so it can self-clean
        for queue in table.queues.values() {
            if queue.requests.iter().any(|r| r.txn_id == victim_id) {
                queue.cvar.notify_all();
            }
        }

        table.waits_for.remove(&victim_id);
        for edges in table.waits_for.values_mut() {
            edges.remove(&victim_id);
        }
    }

    /// Current edge list of the waits-for graph, for inspection in tests.
    pub fn edge_list(&self) -> Vec<(TransactionId, TransactionId)> {
        let table: MutexGuard<'_, LockTable> = self.table.lock();
        table
            .waits_for
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Aborts the transaction and builds the matching error value.
fn abort(txn: &Transaction, reason: AbortReason) -> QuarryError {
    txn.set_state(TransactionState::Aborted);
    QuarryError::TransactionAbort {
        txn_id: txn.id(),
        reason,
    }
}

/// Error for a waiter that woke up already aborted by the detector.
fn deadlock_abort(txn: &Transaction) -> QuarryError {
    QuarryError::TransactionAbort {
        txn_id: txn.id(),
        reason: AbortReason::Deadlock,
    }
}
