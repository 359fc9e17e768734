pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod key_comparator;

pub use btree_index::{BTreeIndex, OperationType};
pub use btree_iterator::BTreeIterator;
pub use btree_page::{
    BTreePageMut, BTreePageRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef,
};
pub use key_comparator::{
    BytewiseComparator, IntegerComparator, KeyComparator, ReverseComparator,
};
