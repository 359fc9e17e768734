use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{
    PageId, QuarryError, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::concurrency::{PageLatch, Transaction};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_iterator::BTreeIterator;
use super::btree_page::{
    BTreePageMut, BTreePageRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef,
};
use super::key_comparator::KeyComparator;

/// What a traversal intends to do at the leaf; decides latch modes and when
/// ancestor latches may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Find,
    Insert,
    Delete,
}

/// Clustered B+Tree index mapping unique keys to RecordIds.
///
/// Node pages live in the buffer pool; traversals latch-crab down the tree
/// through the transaction's held-page set, and the root page id is
/// persisted to the header page under the index's name on every root
/// change, so an index survives reopening the database file.
pub struct BTreeIndex {
    name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: u16,
    internal_max_size: u16,
    /// Shared mutable root pointer; the mutex is the root latch, held when
    /// checking emptiness on insert, creating a new root, or adjusting it.
    root_page_id: Mutex<PageId>,
}

impl BTreeIndex {
    /// Opens the index named `name`, recovering its root from the header
    /// page if it was created before.
    pub fn new(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        let root_page_id = {
            let guard = bpm.checked_read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            name: name.to_string(),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root_page_id),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup. Returns the RID stored under `key`, if any.
    pub fn get_value(&self, key: u32, txn: &Transaction) -> Result<Option<RecordId>> {
        if self.is_empty() {
            return Ok(None);
        }

        let result = self.get_value_inner(key, txn);
        if result.is_err() {
            self.release_latches(txn);
        }
        result
    }

    fn get_value_inner(&self, key: u32, txn: &Transaction) -> Result<Option<RecordId>> {
        let leaf_id = self.crab_to_leaf(key, OperationType::Find, txn, false)?;
        let found = txn
            .with_page(leaf_id, |data| {
                LeafNodeRef::new(data).lookup(key, &*self.comparator)
            })
            .ok_or(QuarryError::PageNotLatched(leaf_id))?;
        self.release_latches(txn);
        Ok(found)
    }

    /// Inserts a key/RID pair. Returns false iff the key is already
    /// present.
    pub fn insert(&self, key: u32, rid: RecordId, txn: &Transaction) -> Result<bool> {
        {
            let mut root = self.root_page_id.lock();
            if *root == INVALID_PAGE_ID {
                self.start_new_tree(key, rid, &mut root)?;
                return Ok(true);
            }
        }

        let result = self.insert_into_leaf(key, rid, txn);
        if result.is_err() {
            self.release_latches(txn);
        }
        result
    }

    /// Removes a key if present; absent keys are a no-op.
    pub fn remove(&self, key: u32, txn: &Transaction) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let result = self.remove_inner(key, txn);
        if result.is_err() {
            self.release_latches(txn);
        }
        result
    }

    /// Iterator over every entry in ascending key order.
    pub fn begin(&self) -> Result<BTreeIterator> {
        match self.descend_to_leaf(None)? {
            Some(guard) => Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, 0)),
            None => Ok(BTreeIterator::empty(Arc::clone(&self.bpm))),
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn begin_at(&self, key: u32) -> Result<BTreeIterator> {
        match self.descend_to_leaf(Some(key))? {
            Some(guard) => {
                let index = LeafNodeRef::new(guard.data()).key_index(key, &*self.comparator);
                Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, index))
            }
            None => Ok(BTreeIterator::empty(Arc::clone(&self.bpm))),
        }
    }

    /// Creates the first leaf as the root. Caller holds the root latch.
    fn start_new_tree(&self, key: u32, rid: RecordId, root: &mut PageId) -> Result<()> {
        let mut guard = self.bpm.new_page()?;
        let page_id = guard.page_id();
        {
            let mut leaf = LeafNode::new(guard.data_mut());
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, rid, &*self.comparator);
        }
        drop(guard);

        *root = page_id;
        self.persist_root(page_id)
    }

    fn insert_into_leaf(&self, key: u32, rid: RecordId, txn: &Transaction) -> Result<bool> {
        let leaf_id = self.crab_to_leaf(key, OperationType::Insert, txn, false)?;

        let outcome = txn
            .with_page_mut(leaf_id, |data| {
                let mut leaf = LeafNode::new(data);
                if leaf.lookup(key, &*self.comparator).is_some() {
                    None
                } else {
                    Some(leaf.insert(key, rid, &*self.comparator))
                }
            })
            .ok_or(QuarryError::PageNotLatched(leaf_id))?;

        let Some(new_size) = outcome else {
            self.release_latches(txn);
            return Ok(false);
        };

        if new_size == self.leaf_max_size {
            self.split_leaf(leaf_id, txn)?;
        }

        self.release_latches(txn);
        Ok(true)
    }

    /// Splits a full leaf: upper half moves to a new right sibling, the
    /// sibling chain is relinked, and the sibling's first key is promoted.
    fn split_leaf(&self, leaf_id: PageId, txn: &Transaction) -> Result<()> {
        let mut new_guard = self.bpm.new_page()?;
        let new_id = new_guard.page_id();

        let separator = txn
            .with_page_mut(leaf_id, |data| {
                let mut old_leaf = LeafNode::new(data);
                let mut new_leaf = LeafNode::new(new_guard.data_mut());
                new_leaf.init(new_id, old_leaf.parent_page_id(), self.leaf_max_size);
                old_leaf.move_half_to(&mut new_leaf);
                new_leaf.set_next_page_id(old_leaf.next_page_id());
                old_leaf.set_next_page_id(Some(new_id));
                new_leaf.key_at(0)
            })
            .ok_or(QuarryError::PageNotLatched(leaf_id))?;
        drop(new_guard);

        debug!("leaf {} split, new sibling {}", leaf_id, new_id);
        self.insert_into_parent(leaf_id, separator, new_id, txn)
    }

    /// Wires a freshly split-off node into the tree: grows a new root when
    /// the left node was the root, otherwise inserts into the parent and
    /// recurses if the parent overflows in turn.
    fn insert_into_parent(
        &self,
        left_id: PageId,
        key: u32,
        right_id: PageId,
        txn: &Transaction,
    ) -> Result<()> {
        let parent_id = txn
            .with_page(left_id, |data| BTreePageRef::new(data).parent_page_id())
            .ok_or(QuarryError::PageNotLatched(left_id))?;

        if parent_id == INVALID_PAGE_ID {
            let mut root = self.root_page_id.lock();

            let mut root_guard = self.bpm.new_page()?;
            let new_root_id = root_guard.page_id();
            {
                let mut node = InternalNode::new(root_guard.data_mut());
                node.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                node.populate_new_root(left_id, key, right_id);
            }
            drop(root_guard);

            self.reparent(left_id, new_root_id, txn)?;
            self.reparent(right_id, new_root_id, txn)?;

            *root = new_root_id;
            debug!("root grew to {}", new_root_id);
            return self.persist_root(new_root_id);
        }

        let new_size = txn
            .with_page_mut(parent_id, |data| {
                InternalNode::new(data).insert_node_after(left_id, key, right_id)
            })
            .ok_or(QuarryError::PageNotLatched(parent_id))?
            .ok_or_else(|| {
                QuarryError::IndexCorrupted(format!("{} is not a child of {}", left_id, parent_id))
            })?;

        if new_size == self.internal_max_size + 1 {
            self.split_internal(parent_id, txn)?;
        }
        Ok(())
    }

    /// Splits an overflowed internal node; moved children are re-parented
    /// onto the new sibling.
    fn split_internal(&self, node_id: PageId, txn: &Transaction) -> Result<()> {
        let mut new_guard = self.bpm.new_page()?;
        let new_id = new_guard.page_id();

        let (separator, moved_children) = txn
            .with_page_mut(node_id, |data| {
                let mut old_node = InternalNode::new(data);
                let mut new_node = InternalNode::new(new_guard.data_mut());
                new_node.init(new_id, old_node.parent_page_id(), self.internal_max_size);
                let moved = old_node.move_half_to(&mut new_node);
                (new_node.key_at(0), moved)
            })
            .ok_or(QuarryError::PageNotLatched(node_id))?;
        drop(new_guard);

        for child in moved_children {
            self.reparent(child, new_id, txn)?;
        }

        debug!("internal {} split, new sibling {}", node_id, new_id);
        self.insert_into_parent(node_id, separator, new_id, txn)
    }

    fn remove_inner(&self, key: u32, txn: &Transaction) -> Result<()> {
        let leaf_id = self.crab_to_leaf(key, OperationType::Delete, txn, false)?;

        let removed = txn
            .with_page_mut(leaf_id, |data| {
                LeafNode::new(data).remove(key, &*self.comparator)
            })
            .ok_or(QuarryError::PageNotLatched(leaf_id))?;

        if removed.is_none() {
            self.release_latches(txn);
            return Ok(());
        }

        self.coalesce_or_redistribute(leaf_id, txn)?;
        self.release_latches_and_delete(txn)
    }

    /// Fixes up a node after a deletion: adjusts the root, or borrows from
    /// or merges with a sibling when the node underflowed.
    fn coalesce_or_redistribute(&self, node_id: PageId, txn: &Transaction) -> Result<()> {
        let (is_root, size, min_size, max_size, parent_id) = txn
            .with_page(node_id, |data| {
                let page = BTreePageRef::new(data);
                (
                    page.is_root(),
                    page.size(),
                    page.min_size(),
                    page.max_size(),
                    page.parent_page_id(),
                )
            })
            .ok_or(QuarryError::PageNotLatched(node_id))?;

        if is_root {
            return self.adjust_root(node_id, txn);
        }
        if size >= min_size {
            return Ok(());
        }

        // The parent is still latched (this node was not safe), so its view
        // of the siblings is stable.
        let (index, neighbor_id) = txn
            .with_page(parent_id, |data| {
                let parent = InternalNodeRef::new(data);
                parent.value_index(node_id).map(|index| {
                    let neighbor = if index == 0 {
                        parent.value_at(1)
                    } else {
                        parent.value_at(index - 1)
                    };
                    (index, neighbor)
                })
            })
            .ok_or(QuarryError::PageNotLatched(parent_id))?
            .ok_or_else(|| {
                QuarryError::IndexCorrupted(format!("{} is not a child of {}", node_id, parent_id))
            })?;

        let neighbor_guard = self.bpm.checked_write_page(neighbor_id)?;
        txn.add_into_page_set(PageLatch::Write(neighbor_guard));

        let neighbor_size = txn
            .with_page(neighbor_id, |data| BTreePageRef::new(data).size())
            .ok_or(QuarryError::PageNotLatched(neighbor_id))?;

        if neighbor_size + size >= max_size {
            self.redistribute(neighbor_id, node_id, index, parent_id, txn)
        } else {
            self.coalesce(neighbor_id, node_id, parent_id, index, txn)
        }
    }

    /// Borrows one entry from the neighbor across the parent separator.
    /// Index 0 borrows from the right sibling, everything else from the
    /// left.
    fn redistribute(
        &self,
        neighbor_id: PageId,
        node_id: PageId,
        index: usize,
        parent_id: PageId,
        txn: &Transaction,
    ) -> Result<()> {
        let is_leaf = txn
            .with_page(node_id, |data| BTreePageRef::new(data).is_leaf())
            .ok_or(QuarryError::PageNotLatched(node_id))?;

        let separator_index = if index == 0 { 1 } else { index };

        if is_leaf {
            let new_separator = txn
                .with_pages_mut(neighbor_id, node_id, |neighbor_data, node_data| {
                    let mut neighbor = LeafNode::new(neighbor_data);
                    let mut node = LeafNode::new(node_data);
                    if index == 0 {
                        neighbor.move_first_to_end_of(&mut node);
                        neighbor.key_at(0)
                    } else {
                        neighbor.move_last_to_front_of(&mut node);
                        node.key_at(0)
                    }
                })
                .ok_or(QuarryError::PageNotLatched(neighbor_id))?;

            txn.with_page_mut(parent_id, |data| {
                InternalNode::new(data).set_key_at(separator_index, new_separator)
            })
            .ok_or(QuarryError::PageNotLatched(parent_id))?;
        } else {
            let middle_key = txn
                .with_page(parent_id, |data| {
                    InternalNodeRef::new(data).key_at(separator_index)
                })
                .ok_or(QuarryError::PageNotLatched(parent_id))?;

            let (moved_child, new_separator) = txn
                .with_pages_mut(neighbor_id, node_id, |neighbor_data, node_data| {
                    let mut neighbor = InternalNode::new(neighbor_data);
                    let mut node = InternalNode::new(node_data);
                    if index == 0 {
                        neighbor.move_first_to_end_of(&mut node, middle_key)
                    } else {
                        neighbor.move_last_to_front_of(&mut node, middle_key)
                    }
                })
                .ok_or(QuarryError::PageNotLatched(neighbor_id))?;

            self.reparent(moved_child, node_id, txn)?;

            txn.with_page_mut(parent_id, |data| {
                InternalNode::new(data).set_key_at(separator_index, new_separator)
            })
            .ok_or(QuarryError::PageNotLatched(parent_id))?;
        }

        Ok(())
    }

    /// Merges node and neighbor (the left one absorbs the right), removes
    /// the right child's entry from the parent, schedules the right page
    /// for deletion, and recurses on the parent.
    fn coalesce(
        &self,
        neighbor_id: PageId,
        node_id: PageId,
        parent_id: PageId,
        index: usize,
        txn: &Transaction,
    ) -> Result<()> {
        let (left_id, right_id, remove_index) = if index == 0 {
            (node_id, neighbor_id, 1)
        } else {
            (neighbor_id, node_id, index)
        };

        let is_leaf = txn
            .with_page(node_id, |data| BTreePageRef::new(data).is_leaf())
            .ok_or(QuarryError::PageNotLatched(node_id))?;

        if is_leaf {
            txn.with_pages_mut(right_id, left_id, |right_data, left_data| {
                let mut right = LeafNode::new(right_data);
                let mut left = LeafNode::new(left_data);
                let next = right.next_page_id();
                right.move_all_to(&mut left);
                left.set_next_page_id(next);
            })
            .ok_or(QuarryError::PageNotLatched(right_id))?;
        } else {
            let middle_key = txn
                .with_page(parent_id, |data| {
                    InternalNodeRef::new(data).key_at(remove_index)
                })
                .ok_or(QuarryError::PageNotLatched(parent_id))?;

            let moved_children = txn
                .with_pages_mut(right_id, left_id, |right_data, left_data| {
                    let mut right = InternalNode::new(right_data);
                    let mut left = InternalNode::new(left_data);
                    right.move_all_to(&mut left, middle_key)
                })
                .ok_or(QuarryError::PageNotLatched(right_id))?;

            for child in moved_children {
                self.reparent(child, left_id, txn)?;
            }
        }

        txn.with_page_mut(parent_id, |data| InternalNode::new(data).remove(remove_index))
            .ok_or(QuarryError::PageNotLatched(parent_id))?;
        txn.add_into_deleted_page_set(right_id);
        debug!("merged {} into {}", right_id, left_id);

        self.coalesce_or_redistribute(parent_id, txn)
    }

    /// Handles the root after a deletion: a leaf root emptied to size 0
    /// empties the tree; an internal root reduced to one child promotes
    /// that child.
    fn adjust_root(&self, root_id: PageId, txn: &Transaction) -> Result<()> {
        let mut root = self.root_page_id.lock();

        let (is_leaf, size) = txn
            .with_page(root_id, |data| {
                let page = BTreePageRef::new(data);
                (page.is_leaf(), page.size())
            })
            .ok_or(QuarryError::PageNotLatched(root_id))?;

        if is_leaf {
            if size == 0 {
                *root = INVALID_PAGE_ID;
                txn.add_into_deleted_page_set(root_id);
                debug!("tree emptied, root {} retired", root_id);
                return self.persist_root(INVALID_PAGE_ID);
            }
        } else if size == 1 {
            let child_id = txn
                .with_page_mut(root_id, |data| {
                    InternalNode::new(data).remove_and_return_only_child()
                })
                .ok_or(QuarryError::PageNotLatched(root_id))?;

            self.reparent(child_id, INVALID_PAGE_ID, txn)?;
            *root = child_id;
            txn.add_into_deleted_page_set(root_id);
            debug!("root collapsed onto {}", child_id);
            return self.persist_root(child_id);
        }

        Ok(())
    }

    /// Descends from the root to the leaf responsible for `key`, pushing
    /// latched pages onto the transaction's page set. A page's ancestors
    /// are released as soon as the page is safe for the operation.
    fn crab_to_leaf(
        &self,
        key: u32,
        op: OperationType,
        txn: &Transaction,
        left_most: bool,
    ) -> Result<PageId> {
        let mut page_id = *self.root_page_id.lock();
        if page_id == INVALID_PAGE_ID {
            return Err(QuarryError::InvalidPageId(page_id));
        }

        let mut at_root = true;
        loop {
            let latch = match op {
                OperationType::Find => PageLatch::Read(self.bpm.checked_read_page(page_id)?),
                _ => PageLatch::Write(self.bpm.checked_write_page(page_id)?),
            };

            // The root can move between reading its id and latching the
            // page; restart from the current root if it did.
            if at_root && !BTreePageRef::new(latch.data()).is_root() {
                drop(latch);
                page_id = *self.root_page_id.lock();
                continue;
            }
            at_root = false;

            let (is_leaf, next) = {
                let data = latch.data();
                let page = BTreePageRef::new(data);

                if Self::is_safe(&page, op) {
                    self.release_latches(txn);
                }

                if page.is_leaf() {
                    (true, INVALID_PAGE_ID)
                } else {
                    let node = InternalNodeRef::new(data);
                    let child = if left_most {
                        node.value_at(0)
                    } else {
                        node.lookup(key, &*self.comparator)
                    };
                    (false, child)
                }
            };

            txn.add_into_page_set(latch);
            if is_leaf {
                return Ok(page_id);
            }
            page_id = next;
        }
    }

    /// A node is safe when the pending operation cannot propagate through
    /// it: an insert cannot fill it to its split point, a delete cannot
    /// underflow it. Reads are always safe; the root is exempt from the
    /// delete minimum.
    fn is_safe(page: &BTreePageRef<'_>, op: OperationType) -> bool {
        match op {
            OperationType::Find => true,
            OperationType::Insert => {
                if page.is_leaf() {
                    page.size() + 1 < page.max_size()
                } else {
                    page.size() < page.max_size()
                }
            }
            OperationType::Delete => {
                if page.is_root() {
                    page.is_leaf() || page.size() > 2
                } else {
                    page.size() > page.min_size()
                }
            }
        }
    }

    /// Rewrites a child's parent pointer, through the transaction's latch
    /// set when the child is held there, otherwise under a fresh write
    /// latch.
    fn reparent(&self, child_id: PageId, parent_id: PageId, txn: &Transaction) -> Result<()> {
        let updated = txn.with_page_mut(child_id, |data| {
            BTreePageMut::new(data).set_parent_page_id(parent_id)
        });
        if updated.is_none() {
            let mut guard = self.bpm.checked_write_page(child_id)?;
            BTreePageMut::new(guard.data_mut()).set_parent_page_id(parent_id);
        }
        Ok(())
    }

    /// Records the root under the index name in the header page.
    fn persist_root(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.checked_write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.name, root_id) {
            header.insert_record(&self.name, root_id)?;
        }
        Ok(())
    }

    /// Releases every latch held by the operation, in acquisition order.
    fn release_latches(&self, txn: &Transaction) {
        for latch in txn.drain_page_set() {
            drop(latch);
        }
    }

    /// Releases the latches, then executes the deferred page deletions.
    /// A page still pinned by a concurrent iterator is left to the pool.
    fn release_latches_and_delete(&self, txn: &Transaction) -> Result<()> {
        self.release_latches(txn);
        for page_id in txn.take_deleted_pages() {
            match self.bpm.delete_page(page_id) {
                Ok(_) => {}
                Err(QuarryError::PageStillPinned(_)) => {
                    debug!("deferred delete of {} skipped, still pinned", page_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read-latched descent for iterators: holds the parent only while the
    /// child is fetched. Returns None on an empty tree.
    fn descend_to_leaf(&self, key: Option<u32>) -> Result<Option<ReadPageGuard>> {
        let root_id = *self.root_page_id.lock();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.checked_read_page(root_id)?;
        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(Some(guard));
            }
            let child = {
                let node = InternalNodeRef::new(guard.data());
                match key {
                    Some(key) => node.lookup(key, &*self.comparator),
                    None => node.value_at(0),
                }
            };
            let child_guard = self.bpm.checked_read_page(child)?;
            guard = child_guard;
        }
    }
}
