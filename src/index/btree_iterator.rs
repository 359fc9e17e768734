use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result};

use super::btree_page::LeafNodeRef;

/// Forward iterator over the leaf chain, yielding `(key, RecordId)` in
/// ascending key order. Holds exactly one pinned leaf at a time; crossing a
/// leaf boundary unpins the current leaf before its successor is fetched,
/// so an exhausted iterator never holds a page while waiting for one.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    index: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, guard: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            index,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
        }
    }

    /// Advances to the next entry, following the sibling link at leaf
    /// boundaries. Returns None past the last entry of the rightmost leaf.
    pub fn next_entry(&mut self) -> Result<Option<(u32, RecordId)>> {
        loop {
            let next_page_id = {
                let Some(guard) = self.guard.as_ref() else {
                    return Ok(None);
                };
                let leaf = LeafNodeRef::new(guard.data());
                if self.index < leaf.size() as usize {
                    let item = leaf.item(self.index);
                    self.index += 1;
                    return Ok(Some(item));
                }
                leaf.next_page_id()
            };

            // Unpin the exhausted leaf before touching its successor
            self.guard = None;
            match next_page_id {
                None => return Ok(None),
                Some(page_id) => {
                    self.guard = Some(self.bpm.checked_read_page(page_id)?);
                    self.index = 0;
                }
            }
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(u32, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
