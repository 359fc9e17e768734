mod buffer_pool_manager;
mod lru_replacer;
mod page;
mod page_guard;

pub use buffer_pool_manager::BufferPoolManager;
pub use lru_replacer::LruReplacer;
pub use page::Page;
pub use page_guard::{ReadPageGuard, WritePageGuard};
