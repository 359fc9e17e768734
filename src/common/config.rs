use std::time::Duration;

use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Page ID of the index header page, seeded when the database file is created
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default maximum number of entries in a B+Tree leaf page
pub const DEFAULT_LEAF_MAX_SIZE: u16 = 32;

/// Default maximum number of children in a B+Tree internal page
pub const DEFAULT_INTERNAL_MAX_SIZE: u16 = 32;

/// How often the deadlock detector rebuilds the waits-for graph
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
